//! Unit tests for domain models.

use super::*;

#[cfg(test)]
mod message_role_tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn display_user() {
        assert_eq!(MessageRole::User.to_string(), "user");
    }

    #[test]
    fn display_assistant() {
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn parse_user_variants() {
        assert_eq!(MessageRole::from_str("user").ok(), Some(MessageRole::User));
        assert_eq!(MessageRole::from_str("USER").ok(), Some(MessageRole::User));
        assert_eq!(MessageRole::from_str("human").ok(), Some(MessageRole::User));
    }

    #[test]
    fn parse_assistant_variants() {
        assert_eq!(
            MessageRole::from_str("assistant").ok(),
            Some(MessageRole::Assistant)
        );
        assert_eq!(MessageRole::from_str("ai").ok(), Some(MessageRole::Assistant));
    }

    #[test]
    fn parse_rejects_unknown_role() {
        assert!(MessageRole::from_str("system").is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).expect("serialize");
        assert_eq!(json, "\"assistant\"");
    }
}

#[cfg(test)]
mod document_patch_tests {
    use super::*;

    fn sample() -> Document {
        Document::from_new(
            "doc-1".to_string(),
            NewDocument {
                user_id: 1,
                title: "Draft".to_string(),
                content: "Body text".to_string(),
                excerpt: "Body".to_string(),
                model: "gpt".to_string(),
                metadata: None,
                chunks: None,
            },
        )
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let mut doc = sample();
        let before = doc.clone();
        doc.apply(DocumentPatch::default());
        assert_eq!(doc, before);
    }

    #[test]
    fn patch_overwrites_only_set_fields() {
        let mut doc = sample();
        doc.apply(DocumentPatch {
            title: Some("Final".to_string()),
            metadata: Some(Some(serde_json::json!({"words": 2}))),
            ..DocumentPatch::default()
        });
        assert_eq!(doc.title, "Final");
        assert_eq!(doc.content, "Body text");
        assert_eq!(doc.metadata, Some(serde_json::json!({"words": 2})));
        assert!(doc.chunks.is_none());
    }

    #[test]
    fn patch_can_clear_optional_fields() {
        let mut doc = sample();
        doc.apply(DocumentPatch {
            metadata: Some(Some(serde_json::json!({"words": 2}))),
            chunks: Some(Some(serde_json::json!([]))),
            ..DocumentPatch::default()
        });
        doc.apply(DocumentPatch {
            metadata: Some(None),
            ..DocumentPatch::default()
        });
        assert!(doc.metadata.is_none());
        assert_eq!(doc.chunks, Some(serde_json::json!([])));
    }

    #[test]
    fn document_serializes_camel_case() {
        let value = serde_json::to_value(sample()).expect("serialize");
        assert!(value.get("userId").is_some());
        assert!(value.get("user_id").is_none());
        assert_eq!(value.get("metadata"), Some(&serde_json::Value::Null));
    }
}

#[cfg(test)]
mod conversation_tests {
    use super::*;

    #[test]
    fn new_conversation_timestamps_match() {
        let conv = Conversation::from_new(
            7,
            NewConversation {
                user_id: 1,
                title: "Chat".to_string(),
                model: "gpt".to_string(),
                ..NewConversation::default()
            },
        );
        assert_eq!(conv.created_at, conv.updated_at);
        assert!(conv.context_document_ids.is_none());
    }

    #[test]
    fn patch_refreshes_updated_at() {
        let mut conv = Conversation::from_new(
            1,
            NewConversation {
                user_id: 1,
                title: "Chat".to_string(),
                model: "gpt".to_string(),
                ..NewConversation::default()
            },
        );
        let created = conv.created_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        conv.apply(ConversationPatch {
            title: Some("Renamed".to_string()),
            ..ConversationPatch::default()
        });
        assert_eq!(conv.title, "Renamed");
        assert!(conv.updated_at > created);
    }

    #[test]
    fn patch_clears_context_documents() {
        let mut conv = Conversation::from_new(
            2,
            NewConversation {
                user_id: 1,
                context_document_ids: Some(vec!["doc-1".to_string()]),
                ..NewConversation::default()
            },
        );
        conv.apply(ConversationPatch {
            context_document_ids: Some(None),
            ..ConversationPatch::default()
        });
        assert!(conv.context_document_ids.is_none());
    }
}

#[cfg(test)]
mod profile_tests {
    use super::*;

    #[test]
    fn patch_sets_and_clears_input_text() {
        let mut profile = Profile::from_new(
            1,
            NewProfile {
                user_id: 1,
                input_text: Some("sample".to_string()),
                metadata: Some(serde_json::json!({"tone": "dry"})),
            },
        );
        profile.apply(ProfilePatch {
            input_text: Some(None),
            ..ProfilePatch::default()
        });
        assert!(profile.input_text.is_none());
        assert_eq!(profile.metadata, Some(serde_json::json!({"tone": "dry"})));
    }
}

#[test]
fn now_millis_has_no_sub_millisecond_part() {
    let now = now_millis();
    assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
}

#[test]
fn message_floor_is_strictly_after_and_whole_millis() {
    let after = Utc::now() + chrono::TimeDelta::microseconds(60_000_500);
    let floor = message_floor(Some(after));
    assert!(floor > after);
    assert_eq!(floor.timestamp_subsec_nanos() % 1_000_000, 0);
    assert_eq!(floor.timestamp_millis(), after.timestamp_millis() + 1);

    assert!(message_floor(None) <= now_millis());
}
