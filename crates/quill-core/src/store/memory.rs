//! Volatile in-process backend.
//!
//! All tables live behind a single mutex so multi-table operations (cascade
//! delete, message append plus conversation bump) are one unit to observers.
//! Identifiers come from per-table counters starting right after the store's
//! id base (1 by default); document ids are the counter value prefixed with
//! `doc-`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::{
    Conversation, ConversationPatch, Document, DocumentPatch, Message, NewConversation,
    NewDocument, NewMessage, NewProfile, NewRewrite, NewUser, Profile, ProfilePatch, Rewrite,
    User, message_floor,
};
use crate::store::{BackendResult, EntityStore};

const DOCUMENT_ID_PREFIX: &str = "doc-";

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    documents: BTreeMap<u64, Document>,
    conversations: BTreeMap<i64, Conversation>,
    messages: BTreeMap<i64, Message>,
    rewrites: BTreeMap<i64, Rewrite>,
    profiles: BTreeMap<i64, Profile>,
    next_user_id: i64,
    next_document_seq: u64,
    next_conversation_id: i64,
    next_message_id: i64,
    next_rewrite_id: i64,
    next_profile_id: i64,
    last_message_at: Option<DateTime<Utc>>,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn document_key(id: &str) -> Option<u64> {
    id.strip_prefix(DOCUMENT_ID_PREFIX)?.parse().ok()
}

/// In-memory entity store used as the fallback backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose integer ids start at `base + 1`, keeping them disjoint
    /// from another backend's id range.
    pub fn with_id_base(base: i64) -> Self {
        let tables = Tables {
            next_user_id: base,
            next_conversation_id: base,
            next_message_id: base,
            next_rewrite_id: base,
            next_profile_id: base,
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still guards consistent tables.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub fn user(&self, id: i64) -> Option<User> {
        self.lock().users.get(&id).cloned()
    }

    pub fn user_by_username(&self, username: &str) -> Option<User> {
        self.lock()
            .users
            .values()
            .find(|user| user.username == username)
            .cloned()
    }

    pub fn insert_user(&self, input: NewUser) -> Result<User, Error> {
        let mut tables = self.lock();
        if tables.users.values().any(|u| u.username == input.username) {
            return Err(Error::Conflict(format!(
                "username '{}' already exists",
                input.username
            )));
        }
        let id = next(&mut tables.next_user_id);
        let user = User {
            id,
            username: input.username,
            password: input.password,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub fn document(&self, id: &str) -> Option<Document> {
        let key = document_key(id)?;
        self.lock().documents.get(&key).cloned()
    }

    pub fn documents_by_user(&self, user_id: i64) -> Vec<Document> {
        self.lock()
            .documents
            .values()
            .filter(|doc| doc.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn insert_document(&self, input: NewDocument) -> Document {
        let mut tables = self.lock();
        tables.next_document_seq += 1;
        let seq = tables.next_document_seq;
        let document = Document::from_new(format!("{DOCUMENT_ID_PREFIX}{seq}"), input);
        tables.documents.insert(seq, document.clone());
        document
    }

    pub fn patch_document(&self, id: &str, patch: DocumentPatch) -> Option<Document> {
        let key = document_key(id)?;
        let mut tables = self.lock();
        let document = tables.documents.get_mut(&key)?;
        document.apply(patch);
        Some(document.clone())
    }

    pub fn remove_document(&self, id: &str) -> bool {
        document_key(id).is_some_and(|key| self.lock().documents.remove(&key).is_some())
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    pub fn conversation(&self, id: i64) -> Option<Conversation> {
        self.lock().conversations.get(&id).cloned()
    }

    pub fn conversations_by_user(&self, user_id: i64) -> Vec<Conversation> {
        self.lock()
            .conversations
            .values()
            .filter(|conv| conv.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn insert_conversation(&self, input: NewConversation) -> Conversation {
        let mut tables = self.lock();
        let id = next(&mut tables.next_conversation_id);
        let conversation = Conversation::from_new(id, input);
        tables.conversations.insert(id, conversation.clone());
        conversation
    }

    pub fn patch_conversation(&self, id: i64, patch: ConversationPatch) -> Option<Conversation> {
        let mut tables = self.lock();
        let conversation = tables.conversations.get_mut(&id)?;
        conversation.apply(patch);
        Some(conversation.clone())
    }

    /// Remove a conversation and every message that references it.
    pub fn remove_conversation(&self, id: i64) -> bool {
        let mut tables = self.lock();
        tables.messages.retain(|_, msg| msg.conversation_id != id);
        tables.conversations.remove(&id).is_some()
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Messages of a conversation by ascending timestamp, insertion order on ties.
    pub fn messages(&self, conversation_id: i64) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .lock()
            .messages
            .values()
            .filter(|msg| msg.conversation_id == conversation_id)
            .cloned()
            .collect();
        // Stable sort over id order keeps insertion order for equal timestamps.
        messages.sort_by_key(|msg| msg.timestamp);
        messages
    }

    pub fn insert_message(&self, input: NewMessage) -> Message {
        self.insert_message_after(input, None)
    }

    /// Insert a message timestamped strictly after `after`.
    pub fn insert_message_after(
        &self,
        input: NewMessage,
        after: Option<DateTime<Utc>>,
    ) -> Message {
        let mut tables = self.lock();
        let id = next(&mut tables.next_message_id);
        let floor = message_floor(after);
        let timestamp = tables.last_message_at.map_or(floor, |last| last.max(floor));
        tables.last_message_at = Some(timestamp);

        let message = Message {
            id,
            conversation_id: input.conversation_id,
            role: input.role,
            content: input.content,
            metadata: input.metadata,
            document_references: input.document_references,
            timestamp,
        };
        tables.messages.insert(id, message.clone());

        if let Some(conversation) = tables.conversations.get_mut(&input.conversation_id) {
            conversation.updated_at = timestamp;
        }
        message
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    // =========================================================================
    // Rewrites
    // =========================================================================

    pub fn rewrite(&self, id: i64) -> Option<Rewrite> {
        self.lock().rewrites.get(&id).cloned()
    }

    pub fn rewrites_by_user(&self, user_id: i64) -> Vec<Rewrite> {
        self.lock()
            .rewrites
            .values()
            .filter(|rewrite| rewrite.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn insert_rewrite(&self, input: NewRewrite) -> Rewrite {
        let mut tables = self.lock();
        let id = next(&mut tables.next_rewrite_id);
        let rewrite = Rewrite::from_new(id, input);
        tables.rewrites.insert(id, rewrite.clone());
        rewrite
    }

    pub fn remove_rewrite(&self, id: i64) -> bool {
        self.lock().rewrites.remove(&id).is_some()
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    pub fn profile(&self, id: i64) -> Option<Profile> {
        self.lock().profiles.get(&id).cloned()
    }

    pub fn profiles_by_user(&self, user_id: i64) -> Vec<Profile> {
        self.lock()
            .profiles
            .values()
            .filter(|profile| profile.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn insert_profile(&self, input: NewProfile) -> Profile {
        let mut tables = self.lock();
        let id = next(&mut tables.next_profile_id);
        let profile = Profile::from_new(id, input);
        tables.profiles.insert(id, profile.clone());
        profile
    }

    pub fn patch_profile(&self, id: i64, patch: ProfilePatch) -> Option<Profile> {
        let mut tables = self.lock();
        let profile = tables.profiles.get_mut(&id)?;
        profile.apply(patch);
        Some(profile.clone())
    }

    pub fn remove_profile(&self, id: i64) -> bool {
        self.lock().profiles.remove(&id).is_some()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn get_user(&self, id: i64) -> BackendResult<Option<User>> {
        Ok(self.user(id))
    }

    async fn get_user_by_username(&self, username: &str) -> BackendResult<Option<User>> {
        Ok(self.user_by_username(username))
    }

    async fn create_user(&self, user: NewUser) -> BackendResult<User> {
        self.insert_user(user)
    }

    async fn get_document(&self, id: &str) -> BackendResult<Option<Document>> {
        Ok(self.document(id))
    }

    async fn get_documents_by_user(&self, user_id: i64) -> BackendResult<Vec<Document>> {
        Ok(self.documents_by_user(user_id))
    }

    async fn create_document(&self, document: NewDocument) -> BackendResult<Document> {
        Ok(self.insert_document(document))
    }

    async fn update_document(
        &self,
        id: &str,
        patch: DocumentPatch,
    ) -> BackendResult<Option<Document>> {
        Ok(self.patch_document(id, patch))
    }

    async fn delete_document(&self, id: &str) -> BackendResult<bool> {
        Ok(self.remove_document(id))
    }

    async fn get_conversation(&self, id: i64) -> BackendResult<Option<Conversation>> {
        Ok(self.conversation(id))
    }

    async fn get_conversations_by_user(&self, user_id: i64) -> BackendResult<Vec<Conversation>> {
        Ok(self.conversations_by_user(user_id))
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> BackendResult<Conversation> {
        Ok(self.insert_conversation(conversation))
    }

    async fn update_conversation(
        &self,
        id: i64,
        patch: ConversationPatch,
    ) -> BackendResult<Option<Conversation>> {
        Ok(self.patch_conversation(id, patch))
    }

    async fn delete_conversation(&self, id: i64) -> BackendResult<bool> {
        Ok(self.remove_conversation(id))
    }

    async fn get_messages(&self, conversation_id: i64) -> BackendResult<Vec<Message>> {
        Ok(self.messages(conversation_id))
    }

    async fn create_message_after(
        &self,
        message: NewMessage,
        after: Option<DateTime<Utc>>,
    ) -> BackendResult<Message> {
        Ok(self.insert_message_after(message, after))
    }

    async fn get_rewrite(&self, id: i64) -> BackendResult<Option<Rewrite>> {
        Ok(self.rewrite(id))
    }

    async fn get_rewrites_by_user(&self, user_id: i64) -> BackendResult<Vec<Rewrite>> {
        Ok(self.rewrites_by_user(user_id))
    }

    async fn create_rewrite(&self, rewrite: NewRewrite) -> BackendResult<Rewrite> {
        Ok(self.insert_rewrite(rewrite))
    }

    async fn delete_rewrite(&self, id: i64) -> BackendResult<bool> {
        Ok(self.remove_rewrite(id))
    }

    async fn get_profile(&self, id: i64) -> BackendResult<Option<Profile>> {
        Ok(self.profile(id))
    }

    async fn get_profiles_by_user(&self, user_id: i64) -> BackendResult<Vec<Profile>> {
        Ok(self.profiles_by_user(user_id))
    }

    async fn create_profile(&self, profile: NewProfile) -> BackendResult<Profile> {
        Ok(self.insert_profile(profile))
    }

    async fn update_profile(
        &self,
        id: i64,
        patch: ProfilePatch,
    ) -> BackendResult<Option<Profile>> {
        Ok(self.patch_profile(id, patch))
    }

    async fn delete_profile(&self, id: i64) -> BackendResult<bool> {
        Ok(self.remove_profile(id))
    }
}
