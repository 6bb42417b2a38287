//! SQLite credential store.

use super::credentials::{CredentialRecord, CredentialStore, StoreError};
use crate::identity::{Identity, PickleKey};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Single-row credential table.
///
/// The `CHECK (id = 1)` constraint pins the table to one record; `save` uses
/// `INSERT OR REPLACE` on that key so the write is a single atomic statement.
const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS bot_identity (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        access_token TEXT NOT NULL,
        device_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        pickle_key BLOB
    )
"#;

/// Databases written by earlier deployments hold an unkeyed `credentials`
/// table with camelCase columns. Its first row is copied once into
/// `bot_identity`; the old table is left untouched.
const LEGACY_TABLE_CHECK: &str =
    "SELECT COUNT(*) FROM pragma_table_info('credentials') WHERE name = 'accessToken'";

const LEGACY_IMPORT: &str = r#"
    INSERT OR IGNORE INTO bot_identity (id, access_token, device_id, user_id, pickle_key)
    SELECT 1, COALESCE(accessToken, ''), COALESCE(deviceId, ''), COALESCE(userId, ''), pickleKey
    FROM credentials
    LIMIT 1
"#;

type CredentialRow = (String, String, String, Option<Vec<u8>>);

/// SQLite-backed credential store
#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database at `path`.
    ///
    /// Schema creation is idempotent and runs on every open.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;

        let legacy: i64 = sqlx::query_scalar(LEGACY_TABLE_CHECK)
            .fetch_one(&self.pool)
            .await?;
        if legacy > 0 {
            let imported = sqlx::query(LEGACY_IMPORT)
                .execute(&self.pool)
                .await?
                .rows_affected();
            if imported > 0 {
                tracing::info!("imported credential record from legacy table");
            }
        }
        Ok(())
    }

    fn decode(row: CredentialRow) -> Result<CredentialRecord, StoreError> {
        let (access_token, device_id, user_id, pickle_key) = row;

        let pickle_key = match pickle_key {
            None => None,
            Some(blob) => Some(PickleKey::from_slice(&blob).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "pickle key is {} bytes, expected {}",
                    blob.len(),
                    crate::identity::PICKLE_KEY_LEN
                ))
            })?),
        };

        Ok(CredentialRecord {
            access_token,
            user_id,
            device_id,
            pickle_key,
        })
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT access_token, device_id, user_id, pickle_key FROM bot_identity WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::decode).transpose()
    }

    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        let creds = identity.credentials();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO bot_identity (id, access_token, device_id, user_id, pickle_key)
            VALUES (1, ?, ?, ?, ?)
            "#,
        )
        .bind(&creds.access_token)
        .bind(&creds.device_id)
        .bind(&creds.user_id)
        .bind(identity.pickle_key().as_bytes().to_vec())
        .execute(&self.pool)
        .await?;

        tracing::debug!(user_id = %creds.user_id, "credential record written");
        Ok(())
    }
}
