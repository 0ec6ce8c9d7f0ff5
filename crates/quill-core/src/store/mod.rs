//! Entity store contract shared by the durable and volatile backends.

pub mod health;
pub mod memory;
pub mod resilient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::{
    Conversation, ConversationPatch, Document, DocumentPatch, Message, NewConversation,
    NewDocument, NewMessage, NewProfile, NewRewrite, NewUser, Profile, ProfilePatch, Rewrite,
    User,
};

pub use health::{BackendMode, HealthTracker, StoreHealth};
pub use memory::MemoryStore;
pub use resilient::ResilientStore;

/// Outcome of a single backend call: the value, or the reason it failed.
pub type BackendResult<T> = std::result::Result<T, Error>;

/// CRUD operations for every persisted entity type.
///
/// Lookups return `Ok(None)` for a missing row, updates never create, and
/// deletes report whether a row was removed. Deleting a conversation also
/// removes its messages as one unit. Creating a message refreshes the owning
/// conversation's `updated_at` in the same backend.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Cheap reachability check.
    async fn ping(&self) -> BackendResult<()>;

    // Users
    async fn get_user(&self, id: i64) -> BackendResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> BackendResult<Option<User>>;
    async fn create_user(&self, user: NewUser) -> BackendResult<User>;

    // Documents
    async fn get_document(&self, id: &str) -> BackendResult<Option<Document>>;
    async fn get_documents_by_user(&self, user_id: i64) -> BackendResult<Vec<Document>>;
    async fn create_document(&self, document: NewDocument) -> BackendResult<Document>;
    async fn update_document(
        &self,
        id: &str,
        patch: DocumentPatch,
    ) -> BackendResult<Option<Document>>;
    async fn delete_document(&self, id: &str) -> BackendResult<bool>;

    // Conversations
    async fn get_conversation(&self, id: i64) -> BackendResult<Option<Conversation>>;
    async fn get_conversations_by_user(&self, user_id: i64) -> BackendResult<Vec<Conversation>>;
    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> BackendResult<Conversation>;
    async fn update_conversation(
        &self,
        id: i64,
        patch: ConversationPatch,
    ) -> BackendResult<Option<Conversation>>;
    async fn delete_conversation(&self, id: i64) -> BackendResult<bool>;

    // Messages
    async fn get_messages(&self, conversation_id: i64) -> BackendResult<Vec<Message>>;
    async fn create_message(&self, message: NewMessage) -> BackendResult<Message> {
        self.create_message_after(message, None).await
    }

    /// Append a message whose timestamp is strictly later than `after` and
    /// no earlier than any message already stored in this backend.
    async fn create_message_after(
        &self,
        message: NewMessage,
        after: Option<DateTime<Utc>>,
    ) -> BackendResult<Message>;

    // Rewrites
    async fn get_rewrite(&self, id: i64) -> BackendResult<Option<Rewrite>>;
    async fn get_rewrites_by_user(&self, user_id: i64) -> BackendResult<Vec<Rewrite>>;
    async fn create_rewrite(&self, rewrite: NewRewrite) -> BackendResult<Rewrite>;
    async fn delete_rewrite(&self, id: i64) -> BackendResult<bool>;

    // Profiles
    async fn get_profile(&self, id: i64) -> BackendResult<Option<Profile>>;
    async fn get_profiles_by_user(&self, user_id: i64) -> BackendResult<Vec<Profile>>;
    async fn create_profile(&self, profile: NewProfile) -> BackendResult<Profile>;
    async fn update_profile(
        &self,
        id: i64,
        patch: ProfilePatch,
    ) -> BackendResult<Option<Profile>>;
    async fn delete_profile(&self, id: i64) -> BackendResult<bool>;
}
