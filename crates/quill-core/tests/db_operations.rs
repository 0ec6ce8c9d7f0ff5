//! Integration tests for database operations.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use quill_core::models::{
    ConversationPatch, DocumentPatch, MessageRole, NewConversation, NewDocument, NewMessage,
    NewProfile, NewRewrite, NewUser, ProfilePatch,
};
use quill_core::{Database, EntityStore, Error};
use tokio::task::JoinSet;
use uuid::Uuid;

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let filename = format!("quill-test-{}.db", Uuid::new_v4());
    path.push(filename);
    path
}

async fn open_db() -> Database {
    Database::open(&temp_db_path()).await.expect("open db")
}

fn conversation_input(user_id: i64, title: &str) -> NewConversation {
    NewConversation {
        user_id,
        title: title.to_string(),
        model: "gpt-4o".to_string(),
        context_document_ids: Some(vec!["doc-a".to_string()]),
        metadata: Some(serde_json::json!({"pinned": true})),
    }
}

fn message_input(conversation_id: i64, content: &str) -> NewMessage {
    NewMessage {
        conversation_id,
        role: MessageRole::User,
        content: content.to_string(),
        metadata: None,
        document_references: None,
    }
}

// ============================================================================
// Users
// ============================================================================

#[tokio::test]
async fn create_user_assigns_id_and_is_found_by_username() {
    let db = open_db().await;

    let user = db
        .create_user(NewUser {
            username: "ada".to_string(),
            password: "pw".to_string(),
        })
        .await
        .expect("create");
    assert!(user.id > 0);

    let by_id = db.get_user(user.id).await.expect("get").expect("exists");
    assert_eq!(by_id, user);

    let by_name = db
        .get_user_by_username("ada")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(by_name.id, user.id);

    assert!(db.get_user_by_username("nobody").await.expect("get").is_none());
}

#[tokio::test]
async fn duplicate_username_is_a_conflict() {
    let db = open_db().await;
    let input = NewUser {
        username: "dup".to_string(),
        password: "pw".to_string(),
    };

    db.create_user(input.clone()).await.expect("first");
    let err = db.create_user(input).await.expect_err("second");
    assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
}

// ============================================================================
// Documents
// ============================================================================

#[tokio::test]
async fn document_round_trips_with_json_fields() {
    let db = open_db().await;

    let doc = db
        .create_document(NewDocument {
            user_id: 4,
            title: "Notes".to_string(),
            content: "Full text".to_string(),
            excerpt: "Full text".to_string(),
            model: "claude".to_string(),
            metadata: Some(serde_json::json!({"source": "upload"})),
            chunks: Some(serde_json::json!([{"title": "Introduction", "wordCount": 2}])),
        })
        .await
        .expect("create");

    let (millis, suffix) = doc.id.split_once('-').expect("composite id");
    assert!(!millis.is_empty());
    assert_eq!(suffix.len(), 8);

    let fetched = db.get_document(&doc.id).await.expect("get").expect("exists");
    assert_eq!(fetched, doc);

    let listed = db.get_documents_by_user(4).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert!(db.get_documents_by_user(5).await.expect("list").is_empty());
}

#[tokio::test]
async fn update_document_applies_partial_patch() {
    let db = open_db().await;
    let doc = db
        .create_document(NewDocument {
            user_id: 1,
            title: "Old".to_string(),
            content: "Body".to_string(),
            ..Default::default()
        })
        .await
        .expect("create");

    let updated = db
        .update_document(
            &doc.id,
            DocumentPatch {
                title: Some("New".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(updated.title, "New");
    assert_eq!(updated.content, "Body");

    let missing = db
        .update_document("missing", DocumentPatch::default())
        .await
        .expect("update");
    assert!(missing.is_none());
}

#[tokio::test]
async fn delete_document_reports_whether_removed() {
    let db = open_db().await;
    let doc = db
        .create_document(NewDocument {
            user_id: 1,
            ..Default::default()
        })
        .await
        .expect("create");

    assert!(db.delete_document(&doc.id).await.expect("delete"));
    assert!(!db.delete_document(&doc.id).await.expect("delete again"));
    assert!(db.get_document(&doc.id).await.expect("get").is_none());
}

// ============================================================================
// Conversations and messages
// ============================================================================

#[tokio::test]
async fn conversation_update_refreshes_updated_at() {
    let db = open_db().await;
    let conversation = db
        .create_conversation(conversation_input(1, "Chat"))
        .await
        .expect("create");
    assert_eq!(conversation.created_at, conversation.updated_at);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let updated = db
        .update_conversation(
            conversation.id,
            ConversationPatch {
                title: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.context_document_ids, conversation.context_document_ids);
    assert!(updated.updated_at > conversation.updated_at);

    let fetched = db
        .get_conversation(conversation.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(fetched, updated);
}

#[tokio::test]
async fn conversation_update_can_clear_optional_columns() {
    let db = open_db().await;
    let conversation = db
        .create_conversation(conversation_input(1, "Chat"))
        .await
        .expect("create");

    db.update_conversation(
        conversation.id,
        ConversationPatch {
            context_document_ids: Some(None),
            metadata: Some(None),
            ..Default::default()
        },
    )
    .await
    .expect("update")
    .expect("exists");

    let fetched = db
        .get_conversation(conversation.id)
        .await
        .expect("get")
        .expect("exists");
    assert!(fetched.context_document_ids.is_none());
    assert!(fetched.metadata.is_none());
    assert_eq!(fetched.title, "Chat");
}

#[tokio::test]
async fn messages_are_ordered_and_bump_conversation() {
    let db = open_db().await;
    let conversation = db
        .create_conversation(conversation_input(1, "Chat"))
        .await
        .expect("create");

    let mut last = None;
    for content in ["one", "two", "three"] {
        last = Some(
            db.create_message(message_input(conversation.id, content))
                .await
                .expect("message"),
        );
    }
    let last = last.expect("message created");

    let messages = db.get_messages(conversation.id).await.expect("messages");
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
    assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let conversation = db
        .get_conversation(conversation.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(conversation.updated_at, last.timestamp);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_message_appends_all_succeed() {
    let db = Arc::new(open_db().await);
    let conversation = db
        .create_conversation(conversation_input(1, "Busy"))
        .await
        .expect("create");

    let mut tasks = JoinSet::new();
    for i in 0..40 {
        let db = Arc::clone(&db);
        tasks.spawn(async move {
            db.create_message(message_input(conversation.id, &format!("m{i}")))
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("task").expect("message");
    }

    let messages = db.get_messages(conversation.id).await.expect("messages");
    assert_eq!(messages.len(), 40);
    assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    // Timestamps follow commit order, which is id order.
    assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
}

#[tokio::test]
async fn message_timestamp_lands_after_floor() {
    let db = open_db().await;
    let conversation = db
        .create_conversation(conversation_input(1, "Chat"))
        .await
        .expect("create");

    let floor = Utc::now() + TimeDelta::seconds(60);
    let message = db
        .create_message_after(message_input(conversation.id, "late"), Some(floor))
        .await
        .expect("message");
    assert!(message.timestamp > floor);

    let next = db
        .create_message(message_input(conversation.id, "later"))
        .await
        .expect("message");
    assert!(next.timestamp >= message.timestamp);

    let stored = db.get_messages(conversation.id).await.expect("messages");
    assert_eq!(stored[0].timestamp, message.timestamp);
}

#[tokio::test]
async fn delete_conversation_removes_its_messages() {
    let db = open_db().await;
    let keep = db
        .create_conversation(conversation_input(1, "Keep"))
        .await
        .expect("create");
    let doomed = db
        .create_conversation(conversation_input(1, "Drop"))
        .await
        .expect("create");

    for content in ["a", "b", "c"] {
        db.create_message(message_input(doomed.id, content))
            .await
            .expect("message");
    }
    db.create_message(message_input(keep.id, "stay"))
        .await
        .expect("message");

    assert!(db.delete_conversation(doomed.id).await.expect("delete"));
    assert!(db.get_messages(doomed.id).await.expect("messages").is_empty());
    assert_eq!(db.get_messages(keep.id).await.expect("messages").len(), 1);
    assert!(!db.delete_conversation(doomed.id).await.expect("delete again"));

    let counts = db.table_counts().await.expect("counts");
    assert_eq!(counts.conversations, 1);
    assert_eq!(counts.messages, 1);
}

// ============================================================================
// Rewrites and profiles
// ============================================================================

#[tokio::test]
async fn rewrite_lifecycle() {
    let db = open_db().await;
    let rewrite = db
        .create_rewrite(NewRewrite {
            user_id: 9,
            model: "gpt-4o".to_string(),
            mode: "concise".to_string(),
            original_content: "A rather long sentence.".to_string(),
            rewritten_content: "Short.".to_string(),
            instructions: Some("trim".to_string()),
            source_type: Some("document".to_string()),
            source_id: Some("doc-1".to_string()),
            metadata: None,
        })
        .await
        .expect("create");

    let fetched = db.get_rewrite(rewrite.id).await.expect("get").expect("exists");
    assert_eq!(fetched, rewrite);
    assert_eq!(db.get_rewrites_by_user(9).await.expect("list").len(), 1);

    assert!(db.delete_rewrite(rewrite.id).await.expect("delete"));
    assert!(db.get_rewrite(rewrite.id).await.expect("get").is_none());
}

#[tokio::test]
async fn profile_lifecycle() {
    let db = open_db().await;
    let profile = db
        .create_profile(NewProfile {
            user_id: 3,
            input_text: Some("sample".to_string()),
            metadata: Some(serde_json::json!({"tone": "dry"})),
        })
        .await
        .expect("create");

    let updated = db
        .update_profile(
            profile.id,
            ProfilePatch {
                input_text: Some(Some("new sample".to_string())),
                metadata: None,
            },
        )
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(updated.input_text.as_deref(), Some("new sample"));
    assert_eq!(updated.metadata, profile.metadata);

    assert_eq!(db.get_profiles_by_user(3).await.expect("list").len(), 1);
    assert!(db.delete_profile(profile.id).await.expect("delete"));
    assert!(!db.delete_profile(profile.id).await.expect("delete again"));
    assert!(db
        .update_profile(profile.id, ProfilePatch::default())
        .await
        .expect("update")
        .is_none());
}

#[tokio::test]
async fn ping_succeeds_on_open_database() {
    let db = open_db().await;
    db.ping().await.expect("ping");
}
