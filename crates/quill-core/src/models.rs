//! Domain models for the persisted entities.
//!
//! Each entity comes with a `New*` creation input (no id, no timestamps) and,
//! for mutable entities, a `*Patch` partial update where `None` means "leave
//! unchanged". Optional entity fields are patched with `Option<Option<T>>`:
//! `Some(None)` clears the field. Serialized names are camelCase so the persisted shape matches
//! what callers already exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current time truncated to millisecond precision.
///
/// Both backends store timestamps as unix milliseconds, so every timestamp is
/// created at that precision to round-trip identically.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Earliest timestamp a new message may take: now, or the first whole
/// millisecond past `after` when that is later.
pub(crate) fn message_floor(after: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now_millis();
    after
        .and_then(|after| DateTime::from_timestamp_millis(after.timestamp_millis() + 1))
        .map_or(now, |next| next.max(now))
}

// =========================================================================
// Users
// =========================================================================

/// An account. Usernames are unique per backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

// =========================================================================
// Documents
// =========================================================================

/// A stored document together with its chunk-summary blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub model: String,
    pub date: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
    pub chunks: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub model: String,
    pub metadata: Option<serde_json::Value>,
    pub chunks: Option<serde_json::Value>,
}

/// Partial update for a document.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub model: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub metadata: Option<Option<serde_json::Value>>,
    pub chunks: Option<Option<serde_json::Value>>,
}

impl Document {
    pub(crate) fn from_new(id: String, input: NewDocument) -> Self {
        Self {
            id,
            user_id: input.user_id,
            title: input.title,
            content: input.content,
            excerpt: input.excerpt,
            model: input.model,
            date: now_millis(),
            metadata: input.metadata,
            chunks: input.chunks,
        }
    }

    /// Merge the set fields of `patch` over this document.
    pub fn apply(&mut self, patch: DocumentPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(excerpt) = patch.excerpt {
            self.excerpt = excerpt;
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
        if let Some(chunks) = patch.chunks {
            self.chunks = chunks;
        }
    }
}

// =========================================================================
// Conversations
// =========================================================================

/// A chat conversation, optionally grounded in a set of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub model: String,
    pub context_document_ids: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub user_id: i64,
    pub title: String,
    pub model: String,
    pub context_document_ids: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

/// Partial update for a conversation. Applying it refreshes `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub model: Option<String>,
    pub context_document_ids: Option<Option<Vec<String>>>,
    pub metadata: Option<Option<serde_json::Value>>,
}

impl Conversation {
    pub(crate) fn from_new(id: i64, input: NewConversation) -> Self {
        let now = now_millis();
        Self {
            id,
            user_id: input.user_id,
            title: input.title,
            model: input.model,
            context_document_ids: input.context_document_ids,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: ConversationPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(ids) = patch.context_document_ids {
            self.context_document_ids = ids;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
        self.updated_at = now_millis();
    }
}

// =========================================================================
// Messages
// =========================================================================

/// A message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub document_references: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub document_references: Option<Vec<String>>,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "human" => Ok(MessageRole::User),
            "assistant" | "ai" | "bot" => Ok(MessageRole::Assistant),
            other => Err(crate::Error::Other(format!("unknown message role '{other}'"))),
        }
    }
}

// =========================================================================
// Rewrites
// =========================================================================

/// A stored rewrite of some source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rewrite {
    pub id: i64,
    pub user_id: i64,
    pub model: String,
    pub mode: String,
    pub original_content: String,
    pub rewritten_content: String,
    pub instructions: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRewrite {
    pub user_id: i64,
    pub model: String,
    pub mode: String,
    pub original_content: String,
    pub rewritten_content: String,
    pub instructions: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
}

impl Rewrite {
    pub(crate) fn from_new(id: i64, input: NewRewrite) -> Self {
        Self {
            id,
            user_id: input.user_id,
            model: input.model,
            mode: input.mode,
            original_content: input.original_content,
            rewritten_content: input.rewritten_content,
            instructions: input.instructions,
            metadata: input.metadata,
            source_type: input.source_type,
            source_id: input.source_id,
            created_at: now_millis(),
        }
    }
}

// =========================================================================
// Profiles
// =========================================================================

/// A writing profile derived from user-provided sample text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub input_text: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub user_id: i64,
    pub input_text: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub input_text: Option<Option<String>>,
    pub metadata: Option<Option<serde_json::Value>>,
}

impl Profile {
    pub(crate) fn from_new(id: i64, input: NewProfile) -> Self {
        Self {
            id,
            user_id: input.user_id,
            input_text: input.input_text,
            metadata: input.metadata,
            created_at: now_millis(),
        }
    }

    pub fn apply(&mut self, patch: ProfilePatch) {
        if let Some(input_text) = patch.input_text {
            self.input_text = input_text;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
