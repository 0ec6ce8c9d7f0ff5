//! Resilient store: durable backend first, volatile backend on failure.
//!
//! Every operation is tried once against the durable backend (unless the
//! health tracker has it in degraded mode). On error the failure is logged
//! and recorded, and the same operation runs against the volatile backend.
//! Callers never see a backend error; the only visible failure is absence.
//!
//! Writes served by the volatile backend are never replayed to the durable
//! one. Once that has happened the store is `diverged`: lookups that miss
//! durably also consult the volatile backend, and lists include its rows.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::config::FallbackConfig;
use crate::error::{Error, Result};
use crate::models::{
    Conversation, ConversationPatch, Document, DocumentPatch, Message, NewConversation,
    NewDocument, NewMessage, NewProfile, NewRewrite, NewUser, Profile, ProfilePatch, Rewrite,
    User,
};
use crate::store::{BackendResult, EntityStore, HealthTracker, MemoryStore, StoreHealth};

/// First integer id minus one handed out by the fallback backend. Durable
/// AUTOINCREMENT ids stay far below it, so ids never collide across backends.
pub const VOLATILE_ID_BASE: i64 = 1 << 48;

pub struct ResilientStore {
    durable: Arc<dyn EntityStore>,
    volatile: MemoryStore,
    health: HealthTracker,
    /// Newest message timestamp handed out by either backend.
    message_clock: Mutex<Option<DateTime<Utc>>>,
}

impl ResilientStore {
    pub fn new(durable: Arc<dyn EntityStore>, policy: FallbackConfig) -> Self {
        Self {
            durable,
            volatile: MemoryStore::with_id_base(VOLATILE_ID_BASE),
            health: HealthTracker::new(policy),
            message_clock: Mutex::new(None),
        }
    }

    /// The fallback backend, for inspection.
    pub fn volatile(&self) -> &MemoryStore {
        &self.volatile
    }

    pub fn health(&self) -> StoreHealth {
        self.health.snapshot()
    }

    /// Ping the durable backend regardless of mode and record the outcome.
    pub async fn check_durable(&self) -> StoreHealth {
        match self.durable.ping().await {
            Ok(()) => self.health.record_success(),
            Err(err) => {
                tracing::warn!(error = %err, "durable backend ping failed");
                self.health.record_failure("ping", &err.to_string());
            }
        }
        self.health.snapshot()
    }

    /// Run one durable call. `None` means it failed or was skipped and the
    /// caller must fall back.
    async fn attempt<T, K, F>(&self, operation: &'static str, key: K, call: F) -> Option<T>
    where
        K: Display,
        F: Future<Output = BackendResult<T>>,
    {
        if !self.health.should_try_durable() {
            tracing::debug!(operation, key = %key, "durable backend skipped while degraded");
            return None;
        }
        match call.await {
            Ok(value) => {
                self.health.record_success();
                Some(value)
            }
            Err(err) => {
                tracing::warn!(
                    operation,
                    key = %key,
                    error = %err,
                    "durable backend failed, falling back to volatile backend"
                );
                self.health.record_failure(operation, &err.to_string());
                None
            }
        }
    }

    /// Resolve a lookup: durable hit, durable miss, or volatile.
    fn lookup<T>(
        &self,
        durable: Option<Option<T>>,
        volatile: impl FnOnce() -> Option<T>,
    ) -> Option<T> {
        match durable {
            Some(Some(found)) => Some(found),
            Some(None) if !self.health.diverged() => None,
            _ => volatile(),
        }
    }

    fn list<T>(&self, durable: Option<Vec<T>>, volatile: impl FnOnce() -> Vec<T>) -> Vec<T> {
        match durable {
            Some(mut rows) => {
                if self.health.diverged() {
                    rows.extend(volatile());
                }
                rows
            }
            None => volatile(),
        }
    }

    fn volatile_write<T>(&self, operation: &'static str, value: T) -> T {
        self.health.record_volatile_write(operation);
        value
    }

    /// Resolve an update: a durable miss only falls through once diverged.
    fn modify<T>(
        &self,
        operation: &'static str,
        durable: Option<Option<T>>,
        volatile: impl FnOnce() -> Option<T>,
    ) -> Option<T> {
        match durable {
            Some(Some(updated)) => Some(updated),
            Some(None) if !self.health.diverged() => None,
            _ => {
                let updated = volatile();
                if updated.is_some() {
                    self.health.record_volatile_write(operation);
                }
                updated
            }
        }
    }

    fn remove(
        &self,
        operation: &'static str,
        durable: Option<bool>,
        volatile: impl FnOnce() -> bool,
    ) -> bool {
        match durable {
            Some(true) => true,
            Some(false) if !self.health.diverged() => false,
            _ => {
                let removed = volatile();
                if removed {
                    self.health.record_volatile_write(operation);
                }
                removed
            }
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn get_user(&self, id: i64) -> Option<User> {
        let durable = self.attempt("get_user", id, self.durable.get_user(id)).await;
        self.lookup(durable, || self.volatile.user(id))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let durable = self
            .attempt(
                "get_user_by_username",
                username,
                self.durable.get_user_by_username(username),
            )
            .await;
        self.lookup(durable, || self.volatile.user_by_username(username))
    }

    /// Create a user. A duplicate username is rejected by whichever backend
    /// serves the call and is the only error this store returns.
    pub async fn create_user(&self, user: NewUser) -> Result<User> {
        if self.health.should_try_durable() {
            match self.durable.create_user(user.clone()).await {
                Ok(created) => {
                    self.health.record_success();
                    return Ok(created);
                }
                Err(err @ Error::Conflict(_)) => {
                    self.health.record_success();
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        operation = "create_user",
                        key = %user.username,
                        error = %err,
                        "durable backend failed, falling back to volatile backend"
                    );
                    self.health.record_failure("create_user", &err.to_string());
                }
            }
        }
        let created = self.volatile.insert_user(user)?;
        Ok(self.volatile_write("create_user", created))
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub async fn get_document(&self, id: &str) -> Option<Document> {
        let durable = self
            .attempt("get_document", id, self.durable.get_document(id))
            .await;
        self.lookup(durable, || self.volatile.document(id))
    }

    pub async fn get_documents_by_user(&self, user_id: i64) -> Vec<Document> {
        let durable = self
            .attempt(
                "get_documents_by_user",
                user_id,
                self.durable.get_documents_by_user(user_id),
            )
            .await;
        self.list(durable, || self.volatile.documents_by_user(user_id))
    }

    pub async fn create_document(&self, document: NewDocument) -> Document {
        let user_id = document.user_id;
        let durable = self
            .attempt(
                "create_document",
                user_id,
                self.durable.create_document(document.clone()),
            )
            .await;
        match durable {
            Some(created) => created,
            None => self.volatile_write("create_document", self.volatile.insert_document(document)),
        }
    }

    pub async fn update_document(&self, id: &str, patch: DocumentPatch) -> Option<Document> {
        let durable = self
            .attempt(
                "update_document",
                id,
                self.durable.update_document(id, patch.clone()),
            )
            .await;
        self.modify("update_document", durable, || {
            self.volatile.patch_document(id, patch)
        })
    }

    pub async fn delete_document(&self, id: &str) -> bool {
        let durable = self
            .attempt("delete_document", id, self.durable.delete_document(id))
            .await;
        self.remove("delete_document", durable, || self.volatile.remove_document(id))
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    pub async fn get_conversation(&self, id: i64) -> Option<Conversation> {
        let durable = self
            .attempt("get_conversation", id, self.durable.get_conversation(id))
            .await;
        self.lookup(durable, || self.volatile.conversation(id))
    }

    pub async fn get_conversations_by_user(&self, user_id: i64) -> Vec<Conversation> {
        let durable = self
            .attempt(
                "get_conversations_by_user",
                user_id,
                self.durable.get_conversations_by_user(user_id),
            )
            .await;
        self.list(durable, || self.volatile.conversations_by_user(user_id))
    }

    pub async fn create_conversation(&self, conversation: NewConversation) -> Conversation {
        let user_id = conversation.user_id;
        let durable = self
            .attempt(
                "create_conversation",
                user_id,
                self.durable.create_conversation(conversation.clone()),
            )
            .await;
        match durable {
            Some(created) => created,
            None => self.volatile_write(
                "create_conversation",
                self.volatile.insert_conversation(conversation),
            ),
        }
    }

    pub async fn update_conversation(
        &self,
        id: i64,
        patch: ConversationPatch,
    ) -> Option<Conversation> {
        let durable = self
            .attempt(
                "update_conversation",
                id,
                self.durable.update_conversation(id, patch.clone()),
            )
            .await;
        self.modify("update_conversation", durable, || {
            self.volatile.patch_conversation(id, patch)
        })
    }

    /// Delete a conversation and its messages. The durable backend does both
    /// in one transaction; any failure falls back to the volatile cascade.
    pub async fn delete_conversation(&self, id: i64) -> bool {
        let durable = self
            .attempt(
                "delete_conversation",
                id,
                self.durable.delete_conversation(id),
            )
            .await;
        if durable == Some(true) && self.health.diverged() {
            // Messages appended during a fallback may reference this durable
            // conversation from the volatile side.
            self.volatile.remove_conversation(id);
        }
        self.remove("delete_conversation", durable, || {
            self.volatile.remove_conversation(id)
        })
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub async fn get_messages(&self, conversation_id: i64) -> Vec<Message> {
        let durable = self
            .attempt(
                "get_messages",
                conversation_id,
                self.durable.get_messages(conversation_id),
            )
            .await;
        let mixed = durable.is_some() && self.health.diverged();
        let mut messages = self.list(durable, || self.volatile.messages(conversation_id));
        if mixed {
            messages.sort_by_key(|msg| msg.timestamp);
        }
        messages
    }

    /// Append a message. The conversation's `updated_at` is refreshed by the
    /// same backend that stores the message.
    ///
    /// Timestamps are strictly increasing across both backends, so a merged
    /// history sorted by timestamp is also in append order.
    pub async fn create_message(&self, message: NewMessage) -> Message {
        let conversation_id = message.conversation_id;
        let after = *self.clock();
        let durable = self
            .attempt(
                "create_message",
                conversation_id,
                self.durable.create_message_after(message.clone(), after),
            )
            .await;
        let created = match durable {
            Some(created) => created,
            None => self.volatile_write(
                "create_message",
                self.volatile.insert_message_after(message, after),
            ),
        };
        let mut clock = self.clock();
        *clock = Some(clock.map_or(created.timestamp, |last| last.max(created.timestamp)));
        created
    }

    fn clock(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.message_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Rewrites
    // =========================================================================

    pub async fn get_rewrite(&self, id: i64) -> Option<Rewrite> {
        let durable = self
            .attempt("get_rewrite", id, self.durable.get_rewrite(id))
            .await;
        self.lookup(durable, || self.volatile.rewrite(id))
    }

    pub async fn get_rewrites_by_user(&self, user_id: i64) -> Vec<Rewrite> {
        let durable = self
            .attempt(
                "get_rewrites_by_user",
                user_id,
                self.durable.get_rewrites_by_user(user_id),
            )
            .await;
        self.list(durable, || self.volatile.rewrites_by_user(user_id))
    }

    pub async fn create_rewrite(&self, rewrite: NewRewrite) -> Rewrite {
        let user_id = rewrite.user_id;
        let durable = self
            .attempt(
                "create_rewrite",
                user_id,
                self.durable.create_rewrite(rewrite.clone()),
            )
            .await;
        match durable {
            Some(created) => created,
            None => self.volatile_write("create_rewrite", self.volatile.insert_rewrite(rewrite)),
        }
    }

    pub async fn delete_rewrite(&self, id: i64) -> bool {
        let durable = self
            .attempt("delete_rewrite", id, self.durable.delete_rewrite(id))
            .await;
        self.remove("delete_rewrite", durable, || self.volatile.remove_rewrite(id))
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    pub async fn get_profile(&self, id: i64) -> Option<Profile> {
        let durable = self
            .attempt("get_profile", id, self.durable.get_profile(id))
            .await;
        self.lookup(durable, || self.volatile.profile(id))
    }

    pub async fn get_profiles_by_user(&self, user_id: i64) -> Vec<Profile> {
        let durable = self
            .attempt(
                "get_profiles_by_user",
                user_id,
                self.durable.get_profiles_by_user(user_id),
            )
            .await;
        self.list(durable, || self.volatile.profiles_by_user(user_id))
    }

    pub async fn create_profile(&self, profile: NewProfile) -> Profile {
        let user_id = profile.user_id;
        let durable = self
            .attempt(
                "create_profile",
                user_id,
                self.durable.create_profile(profile.clone()),
            )
            .await;
        match durable {
            Some(created) => created,
            None => self.volatile_write("create_profile", self.volatile.insert_profile(profile)),
        }
    }

    pub async fn update_profile(&self, id: i64, patch: ProfilePatch) -> Option<Profile> {
        let durable = self
            .attempt(
                "update_profile",
                id,
                self.durable.update_profile(id, patch.clone()),
            )
            .await;
        self.modify("update_profile", durable, || {
            self.volatile.patch_profile(id, patch)
        })
    }

    pub async fn delete_profile(&self, id: i64) -> bool {
        let durable = self
            .attempt("delete_profile", id, self.durable.delete_profile(id))
            .await;
        self.remove("delete_profile", durable, || self.volatile.remove_profile(id))
    }
}
