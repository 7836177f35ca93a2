use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use core_types::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;
pub const MEMORY_SNAPSHOT_KEY: &str = "memory";

pub type SessionId = Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("unknown message role `{0}` in database")]
    UnknownRole(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub message: ChatMessage,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create parent dir for {}", path.display()))?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.to_string_lossy()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT,
                image_data TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_snapshots (
                key TEXT PRIMARY KEY,
                snapshot_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CURRENT_DB_SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        let version = row.get::<String, _>("value").parse::<u32>()?;
        Ok(version)
    }

    pub async fn create_session(&self, title: impl Into<String>) -> Result<ChatSession> {
        let now = Utc::now();
        let id = SessionId::new_v4();
        let title = title.into();
        sqlx::query(
            r#"INSERT INTO sessions(id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)"#,
        )
        .bind(id.to_string())
        .bind(&title)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(ChatSession {
            id,
            title,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn delete_session(&self, session_id: SessionId) -> Result<bool> {
        let result = sqlx::query(r#"DELETE FROM sessions WHERE id = ?1"#)
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn append_message(&self, session_id: SessionId, message: &ChatMessage) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO messages(id, session_id, role, content, timestamp, image_data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(id.to_string())
        .bind(session_id.to_string())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.timestamp)
        .bind(&message.image_data)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("failed to append message")?;

        sqlx::query(r#"UPDATE sessions SET updated_at = ?2 WHERE id = ?1"#)
            .bind(session_id.to_string())
            .bind(&now)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    pub async fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, created_at, updated_at
            FROM sessions
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_session_row).collect()
    }

    pub async fn list_messages(&self, session_id: SessionId) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, role, content, timestamp, image_data, created_at
            FROM messages
            WHERE session_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_message_row).collect()
    }

    pub async fn save_memory_snapshot(&self, key: &str, snapshot_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memory_snapshots(key, snapshot_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                snapshot_json = excluded.snapshot_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(snapshot_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to save memory snapshot")?;
        Ok(())
    }

    pub async fn load_memory_snapshot(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT snapshot_json FROM memory_snapshots WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("snapshot_json")))
    }
}

fn parse_role(value: &str) -> Result<ChatRole, StorageError> {
    match value {
        "system" => Ok(ChatRole::System),
        "user" => Ok(ChatRole::User),
        "assistant" => Ok(ChatRole::Assistant),
        other => Err(StorageError::UnknownRole(other.to_string())),
    }
}

fn map_session_row(row: sqlx::sqlite::SqliteRow) -> Result<ChatSession> {
    let created_at = parse_rfc3339(row.get::<String, _>("created_at"))?;
    let updated_at = parse_rfc3339(row.get::<String, _>("updated_at"))?;
    Ok(ChatSession {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        title: row.get("title"),
        created_at,
        updated_at,
    })
}

fn map_message_row(row: sqlx::sqlite::SqliteRow) -> Result<StoredMessage> {
    let role = parse_role(row.get::<String, _>("role").as_str())?;
    Ok(StoredMessage {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        session_id: Uuid::parse_str(row.get::<String, _>("session_id").as_str())?,
        message: ChatMessage {
            role,
            content: row.get("content"),
            timestamp: row.get("timestamp"),
            image_data: row.get("image_data"),
        },
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
    })
}

fn parse_rfc3339(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc))
}
