use crate::db::models::DbCredential;
use crate::db::schema::sqlite_init;
use crate::error::RelayError;
use crate::types::{AccountIdentity, Credential, Provider, TokenGrant, Transcript};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

pub type SqlitePool = Pool<Sqlite>;

const CREDENTIAL_COLUMNS: &str = "user_id, provider_account_email, access_token, refresh_token, \
     token_expiry, provider_metadata, created_at, updated_at";

/// Open (creating if needed) the database behind `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool, RelayError> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Execute the bundled DDL one statement at a time
/// (SQLite supports multi-commands but sqlx::query doesn't).
pub async fn init_schema(pool: &SqlitePool) -> Result<(), RelayError> {
    for stmt in sqlite_init().split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(decode_err)?
        .with_timezone(&Utc))
}

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), RelayError> {
        init_schema(&self.pool).await
    }

    pub async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Credential>, RelayError> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM {} WHERE user_id = ?",
            provider.table()
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let model = row.map(Self::row_to_model).transpose()?;
        Ok(model.map(|m| m.into_credential(provider)))
    }

    /// Local user currently bound to a provider account, if any.
    pub async fn find_owner_by_email(
        &self,
        provider: Provider,
        email: &str,
    ) -> Result<Option<String>, RelayError> {
        let sql = format!(
            "SELECT user_id FROM {} WHERE provider_account_email = ?",
            provider.table()
        );
        let owner: Option<(String,)> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner.map(|o| o.0))
    }

    /// Bind a freshly exchanged grant to `user_id` in one transaction.
    ///
    /// Fails with `AccountAlreadyBound` without writing when the account
    /// email belongs to another user. Re-authorization updates in place;
    /// refresh token, email and metadata keep their stored values when the
    /// new ones are absent.
    pub async fn bind_exchange(
        &self,
        user_id: &str,
        provider: Provider,
        grant: &TokenGrant,
        identity: &AccountIdentity,
        now: DateTime<Utc>,
    ) -> Result<Credential, RelayError> {
        let table = provider.table();
        let mut tx = self.pool.begin().await?;

        if let Some(email) = identity.email.as_deref() {
            let sql = format!(
                "SELECT user_id FROM {table} WHERE provider_account_email = ? AND user_id <> ?"
            );
            let owner: Option<(String,)> = sqlx::query_as(&sql)
                .bind(email)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            if owner.is_some() {
                return Err(RelayError::AccountAlreadyBound {
                    provider,
                    email: email.to_string(),
                });
            }
        }

        let metadata = identity
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let stamp = now.to_rfc3339();
        let sql = format!(
            r#"
            INSERT INTO {table} ({CREDENTIAL_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                provider_account_email = COALESCE(excluded.provider_account_email, provider_account_email),
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, refresh_token),
                token_expiry = excluded.token_expiry,
                provider_metadata = COALESCE(excluded.provider_metadata, provider_metadata),
                updated_at = excluded.updated_at
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(identity.email.as_deref())
            .bind(grant.access_token.secret())
            .bind(grant.refresh_token.as_ref().map(|t| t.secret().as_str()))
            .bind(grant.expiry_from(now).map(|e| e.to_rfc3339()))
            .bind(metadata)
            .bind(&stamp)
            .bind(&stamp)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Self::bind_conflict(e, provider, identity))?;
        let model = Self::row_to_model(row)?;
        tx.commit().await?;
        Ok(model.into_credential(provider))
    }

    /// Store a refreshed token with a single atomic update. The stored
    /// refresh token survives when the grant carries none.
    pub async fn apply_refresh(
        &self,
        user_id: &str,
        provider: Provider,
        grant: &TokenGrant,
        now: DateTime<Utc>,
    ) -> Result<Credential, RelayError> {
        let sql = format!(
            r#"
            UPDATE {} SET
                access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expiry = ?,
                updated_at = ?
            WHERE user_id = ?
            RETURNING {CREDENTIAL_COLUMNS}
            "#,
            provider.table()
        );
        let row = sqlx::query(&sql)
            .bind(grant.access_token.secret())
            .bind(grant.refresh_token.as_ref().map(|t| t.secret().as_str()))
            .bind(grant.expiry_from(now).map(|e| e.to_rfc3339()))
            .bind(now.to_rfc3339())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Self::row_to_model(row)?.into_credential(provider)),
            None => Err(RelayError::NotConnected {
                provider,
                user_id: user_id.to_string(),
            }),
        }
    }

    /// Every credential the user holds, in `Provider::ALL` order.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Credential>, RelayError> {
        let lookups = Provider::ALL.iter().map(|p| self.get(user_id, *p));
        let found = try_join_all(lookups).await?;
        Ok(found.into_iter().flatten().collect())
    }

    // A concurrent bind can slip past the collision check; the UNIQUE index
    // still rejects it.
    fn bind_conflict(e: sqlx::Error, provider: Provider, identity: &AccountIdentity) -> RelayError {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RelayError::AccountAlreadyBound {
                    provider,
                    email: identity.email.clone().unwrap_or_default(),
                }
            }
            _ => e.into(),
        }
    }

    fn row_to_model(row: SqliteRow) -> Result<DbCredential, sqlx::Error> {
        let user_id: String = row.try_get("user_id")?;
        let provider_account_email: Option<String> = row.try_get("provider_account_email")?;
        let access_token: String = row.try_get("access_token")?;
        let refresh_token: Option<String> = row.try_get("refresh_token")?;
        let expiry_str: Option<String> = row.try_get("token_expiry")?;
        let metadata_json: Option<String> = row.try_get("provider_metadata")?;
        let created_str: String = row.try_get("created_at")?;
        let updated_str: String = row.try_get("updated_at")?;

        let token_expiry = expiry_str.as_deref().map(parse_ts).transpose()?;
        let provider_metadata = match metadata_json {
            Some(s) => Some(serde_json::from_str(&s).map_err(decode_err)?),
            None => None,
        };

        Ok(DbCredential {
            user_id,
            provider_account_email,
            access_token,
            refresh_token,
            token_expiry,
            provider_metadata,
            created_at: parse_ts(&created_str)?,
            updated_at: parse_ts(&updated_str)?,
        })
    }
}

#[derive(Clone)]
pub struct TranscriptStore {
    pool: SqlitePool,
}

impl TranscriptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Re-delivery of the same chunk appends another row.
    pub async fn append(
        &self,
        bot_id: &str,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Transcript, RelayError> {
        let row = sqlx::query(
            r#"INSERT INTO meeting_transcripts (bot_id, user_id, transcript_text, created_at)
               VALUES (?, ?, ?, ?)
               RETURNING id, bot_id, user_id, transcript_text, created_at"#,
        )
        .bind(bot_id)
        .bind(user_id)
        .bind(text)
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::row_to_model(row)?)
    }

    pub async fn list(&self, bot_id: &str, user_id: &str) -> Result<Vec<Transcript>, RelayError> {
        let rows = sqlx::query(
            r#"SELECT id, bot_id, user_id, transcript_text, created_at
               FROM meeting_transcripts WHERE bot_id = ? AND user_id = ? ORDER BY id"#,
        )
        .bind(bot_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Self::row_to_model(r).map_err(RelayError::from))
            .collect()
    }

    fn row_to_model(row: SqliteRow) -> Result<Transcript, sqlx::Error> {
        let created_str: String = row.try_get("created_at")?;
        Ok(Transcript {
            id: row.try_get("id")?,
            bot_id: row.try_get("bot_id")?,
            user_id: row.try_get("user_id")?,
            transcript_text: row.try_get("transcript_text")?,
            created_at: parse_ts(&created_str)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, 0, 0).unwrap()
    }

    fn identity(email: &str) -> AccountIdentity {
        AccountIdentity {
            email: Some(email.to_string()),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn rebind_updates_in_place_and_keeps_refresh_token() {
        let store = CredentialStore::new(memory_pool().await);
        let first = TokenGrant::new("A1")
            .with_refresh_token("R1")
            .with_expires_in(TimeDelta::seconds(3600));
        store
            .bind_exchange("u1", Provider::Asana, &first, &identity("a@x.io"), at(1))
            .await
            .unwrap();

        let again = AccountIdentity {
            email: None,
            metadata: Some(json!({ "workspace_id": "7" })),
        };
        let second = TokenGrant::new("A2");
        let cred = store
            .bind_exchange("u1", Provider::Asana, &second, &again, at(2))
            .await
            .unwrap();

        assert_eq!(cred.access_token.secret(), "A2");
        assert_eq!(cred.refresh_token.unwrap().secret(), "R1");
        assert_eq!(cred.provider_account_email.as_deref(), Some("a@x.io"));
        assert_eq!(cred.provider_metadata, Some(json!({ "workspace_id": "7" })));
        assert_eq!(cred.created_at, at(1));
        assert_eq!(cred.updated_at, at(2));
        assert_eq!(store.list_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn email_collision_is_rejected_per_provider() {
        let store = CredentialStore::new(memory_pool().await);
        let grant = TokenGrant::new("A1");
        store
            .bind_exchange("u1", Provider::Zoom, &grant, &identity("same@x.io"), at(1))
            .await
            .unwrap();

        let err = store
            .bind_exchange("u2", Provider::Zoom, &grant, &identity("same@x.io"), at(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::AccountAlreadyBound { provider: Provider::Zoom, .. }));
        assert!(store.get("u2", Provider::Zoom).await.unwrap().is_none());

        // Same account on a different provider is a different binding.
        store
            .bind_exchange("u2", Provider::Google, &grant, &identity("same@x.io"), at(2))
            .await
            .unwrap();
        assert_eq!(
            store
                .find_owner_by_email(Provider::Zoom, "same@x.io")
                .await
                .unwrap()
                .as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn refresh_of_missing_row_is_not_connected() {
        let store = CredentialStore::new(memory_pool().await);
        let err = store
            .apply_refresh("ghost", Provider::Monday, &TokenGrant::new("A"), at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn transcripts_append_in_order() {
        let store = TranscriptStore::new(memory_pool().await);
        store.append("bot", "u1", "hello", at(1)).await.unwrap();
        store.append("bot", "u1", "hello", at(2)).await.unwrap();
        store.append("bot", "u2", "other", at(2)).await.unwrap();

        let rows = store.list("bot", "u1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].id < rows[1].id);
        assert_eq!(rows[1].created_at, at(2));
        assert!(store.list("bot", "nobody").await.unwrap().is_empty());
    }
}
