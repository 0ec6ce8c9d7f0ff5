//! Durable SQLite backend for quill.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Conversation, ConversationPatch, Document, DocumentPatch, Message, MessageRole,
    NewConversation, NewDocument, NewMessage, NewProfile, NewRewrite, NewUser, Profile,
    ProfilePatch, Rewrite, User, message_floor,
};
use crate::schema::SCHEMA;
use crate::store::{BackendResult, EntityStore};

/// Database handle for quill.
pub struct Database {
    pool: SqlitePool,
}

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub users: i64,
    pub documents: i64,
    pub conversations: i64,
    pub messages: i64,
    pub rewrites: i64,
    pub profiles: i64,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema.
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Count rows in every entity table.
    pub async fn table_counts(&self) -> Result<TableCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS users,
                (SELECT COUNT(*) FROM documents) AS documents,
                (SELECT COUNT(*) FROM conversations) AS conversations,
                (SELECT COUNT(*) FROM messages) AS messages,
                (SELECT COUNT(*) FROM rewrites) AS rewrites,
                (SELECT COUNT(*) FROM profiles) AS profiles
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TableCounts {
            users: row.try_get("users")?,
            documents: row.try_get("documents")?,
            conversations: row.try_get("conversations")?,
            messages: row.try_get("messages")?,
            rewrites: row.try_get("rewrites")?,
            profiles: row.try_get("profiles")?,
        })
    }

    // =========================================================================
    // Documents
    // =========================================================================

    async fn write_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET title = ?, content = ?, excerpt = ?, model = ?, date = ?, metadata = ?, chunks = ?
            WHERE id = ?
            "#,
        )
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.excerpt)
        .bind(&doc.model)
        .bind(doc.date.timestamp_millis())
        .bind(json_text(doc.metadata.as_ref())?)
        .bind(json_text(doc.chunks.as_ref())?)
        .bind(&doc.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for Database {
    async fn ping(&self) -> BackendResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    async fn get_user(&self, id: i64) -> BackendResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> BackendResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_user(&self, user: NewUser) -> BackendResult<User> {
        let result = sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
            .bind(&user.username)
            .bind(&user.password)
            .execute(&self.pool)
            .await;

        match result {
            Ok(result) => Ok(User {
                id: result.last_insert_rowid(),
                username: user.username,
                password: user.password,
            }),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(Error::Conflict(
                format!("username '{}' already exists", user.username),
            )),
            Err(err) => Err(err.into()),
        }
    }

    // =========================================================================
    // Documents
    // =========================================================================

    async fn get_document(&self, id: &str) -> BackendResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_documents_by_user(&self, user_id: i64) -> BackendResult<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE user_id = ? ORDER BY date, id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn create_document(&self, document: NewDocument) -> BackendResult<Document> {
        let doc = Document::from_new(generate_document_id(), document);
        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, title, content, excerpt, model, date, metadata, chunks)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(doc.user_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.excerpt)
        .bind(&doc.model)
        .bind(doc.date.timestamp_millis())
        .bind(json_text(doc.metadata.as_ref())?)
        .bind(json_text(doc.chunks.as_ref())?)
        .execute(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn update_document(
        &self,
        id: &str,
        patch: DocumentPatch,
    ) -> BackendResult<Option<Document>> {
        let Some(mut doc) = self.get_document(id).await? else {
            return Ok(None);
        };
        doc.apply(patch);
        self.write_document(&doc).await?;
        Ok(Some(doc))
    }

    async fn delete_document(&self, id: &str) -> BackendResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    async fn get_conversation(&self, id: i64) -> BackendResult<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn get_conversations_by_user(&self, user_id: i64) -> BackendResult<Vec<Conversation>> {
        let rows = sqlx::query("SELECT * FROM conversations WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> BackendResult<Conversation> {
        let mut conv = Conversation::from_new(0, conversation);
        let result = sqlx::query(
            r#"
            INSERT INTO conversations (user_id, title, model, context_document_ids, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conv.user_id)
        .bind(&conv.title)
        .bind(&conv.model)
        .bind(json_text(conv.context_document_ids.as_ref())?)
        .bind(json_text(conv.metadata.as_ref())?)
        .bind(conv.created_at.timestamp_millis())
        .bind(conv.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        conv.id = result.last_insert_rowid();
        Ok(conv)
    }

    async fn update_conversation(
        &self,
        id: i64,
        patch: ConversationPatch,
    ) -> BackendResult<Option<Conversation>> {
        let Some(mut conv) = self.get_conversation(id).await? else {
            return Ok(None);
        };
        conv.apply(patch);
        sqlx::query(
            r#"
            UPDATE conversations
            SET title = ?, model = ?, context_document_ids = ?, metadata = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&conv.title)
        .bind(&conv.model)
        .bind(json_text(conv.context_document_ids.as_ref())?)
        .bind(json_text(conv.metadata.as_ref())?)
        .bind(conv.updated_at.timestamp_millis())
        .bind(conv.id)
        .execute(&self.pool)
        .await?;
        Ok(Some(conv))
    }

    /// Messages go first, then the conversation row, in one transaction.
    async fn delete_conversation(&self, id: i64) -> BackendResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    async fn get_messages(&self, conversation_id: i64) -> BackendResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn create_message_after(
        &self,
        message: NewMessage,
        after: Option<DateTime<Utc>>,
    ) -> BackendResult<Message> {
        let floor = message_floor(after).timestamp_millis();
        let mut tx = self.pool.begin().await?;

        // Must stay the first statement: the write lock is taken before
        // MAX(timestamp) is read, so concurrent appends wait on busy_timeout.
        let row = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, role, content, metadata, document_references, timestamp)
            SELECT ?, ?, ?, ?, ?, MAX(?, COALESCE((SELECT MAX(timestamp) FROM messages), 0))
            RETURNING id, timestamp
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(json_text(message.metadata.as_ref())?)
        .bind(json_text(message.document_references.as_ref())?)
        .bind(floor)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;
        let timestamp: i64 = row.try_get("timestamp")?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(timestamp)
            .bind(message.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Message {
            id,
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            document_references: message.document_references,
            timestamp: ts_from_ms(timestamp),
        })
    }

    // =========================================================================
    // Rewrites
    // =========================================================================

    async fn get_rewrite(&self, id: i64) -> BackendResult<Option<Rewrite>> {
        let row = sqlx::query("SELECT * FROM rewrites WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rewrite_from_row).transpose()
    }

    async fn get_rewrites_by_user(&self, user_id: i64) -> BackendResult<Vec<Rewrite>> {
        let rows = sqlx::query("SELECT * FROM rewrites WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rewrite_from_row).collect()
    }

    async fn create_rewrite(&self, rewrite: NewRewrite) -> BackendResult<Rewrite> {
        let mut rewrite = Rewrite::from_new(0, rewrite);
        let result = sqlx::query(
            r#"
            INSERT INTO rewrites (user_id, model, mode, original_content, rewritten_content, instructions, metadata, source_type, source_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(rewrite.user_id)
        .bind(&rewrite.model)
        .bind(&rewrite.mode)
        .bind(&rewrite.original_content)
        .bind(&rewrite.rewritten_content)
        .bind(&rewrite.instructions)
        .bind(json_text(rewrite.metadata.as_ref())?)
        .bind(&rewrite.source_type)
        .bind(&rewrite.source_id)
        .bind(rewrite.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        rewrite.id = result.last_insert_rowid();
        Ok(rewrite)
    }

    async fn delete_rewrite(&self, id: i64) -> BackendResult<bool> {
        let result = sqlx::query("DELETE FROM rewrites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    async fn get_profile(&self, id: i64) -> BackendResult<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn get_profiles_by_user(&self, user_id: i64) -> BackendResult<Vec<Profile>> {
        let rows = sqlx::query("SELECT * FROM profiles WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn create_profile(&self, profile: NewProfile) -> BackendResult<Profile> {
        let mut profile = Profile::from_new(0, profile);
        let result = sqlx::query(
            "INSERT INTO profiles (user_id, input_text, metadata, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(profile.user_id)
        .bind(&profile.input_text)
        .bind(json_text(profile.metadata.as_ref())?)
        .bind(profile.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        profile.id = result.last_insert_rowid();
        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: i64,
        patch: ProfilePatch,
    ) -> BackendResult<Option<Profile>> {
        let Some(mut profile) = self.get_profile(id).await? else {
            return Ok(None);
        };
        profile.apply(patch);
        sqlx::query("UPDATE profiles SET input_text = ?, metadata = ? WHERE id = ?")
            .bind(&profile.input_text)
            .bind(json_text(profile.metadata.as_ref())?)
            .bind(profile.id)
            .execute(&self.pool)
            .await?;
        Ok(Some(profile))
    }

    async fn delete_profile(&self, id: i64) -> BackendResult<bool> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =========================================================================
// Row mapping
// =========================================================================

fn ts_from_ms(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or_default()
}

fn json_text<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    row.try_get::<Option<String>, _>(column)?
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(Error::from)
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        excerpt: row.try_get("excerpt")?,
        model: row.try_get("model")?,
        date: ts_from_ms(row.try_get("date")?),
        metadata: json_column(row, "metadata")?,
        chunks: json_column(row, "chunks")?,
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        model: row.try_get("model")?,
        context_document_ids: json_column(row, "context_document_ids")?,
        metadata: json_column(row, "metadata")?,
        created_at: ts_from_ms(row.try_get("created_at")?),
        updated_at: ts_from_ms(row.try_get("updated_at")?),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: MessageRole::from_str(&role)?,
        content: row.try_get("content")?,
        metadata: json_column(row, "metadata")?,
        document_references: json_column(row, "document_references")?,
        timestamp: ts_from_ms(row.try_get("timestamp")?),
    })
}

fn rewrite_from_row(row: &SqliteRow) -> Result<Rewrite> {
    Ok(Rewrite {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        model: row.try_get("model")?,
        mode: row.try_get("mode")?,
        original_content: row.try_get("original_content")?,
        rewritten_content: row.try_get("rewritten_content")?,
        instructions: row.try_get("instructions")?,
        metadata: json_column(row, "metadata")?,
        source_type: row.try_get("source_type")?,
        source_id: row.try_get("source_id")?,
        created_at: ts_from_ms(row.try_get("created_at")?),
    })
}

fn profile_from_row(row: &SqliteRow) -> Result<Profile> {
    Ok(Profile {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        input_text: row.try_get("input_text")?,
        metadata: json_column(row, "metadata")?,
        created_at: ts_from_ms(row.try_get("created_at")?),
    })
}

/// Time plus randomness: base36 unix millis, then 8 hex chars of a v4 uuid.
fn generate_document_id() -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut millis = Utc::now().timestamp_millis().unsigned_abs();
    let mut stamp = Vec::new();
    loop {
        stamp.push(DIGITS[(millis % 36) as usize]);
        millis /= 36;
        if millis == 0 {
            break;
        }
    }
    stamp.reverse();

    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", String::from_utf8_lossy(&stamp), &random[..8])
}
