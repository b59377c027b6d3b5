//! SQL DDL for initializing the relay storage.
//! SQLite-first design; can be adapted for other RDBMS.

use crate::types::Provider;

/// Credential table, instantiated once per provider:
/// - `user_id` PRIMARY KEY, one credential per user for the provider
/// - `provider_account_email` UNIQUE, one local user per provider account
/// - timestamps are RFC3339 text written by the store
const CREDENTIAL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {table} (
    user_id TEXT PRIMARY KEY NOT NULL,
    provider_account_email TEXT NULL UNIQUE,
    access_token TEXT NOT NULL,
    refresh_token TEXT NULL,
    token_expiry TEXT NULL, -- RFC3339, absent when the provider reports none
    provider_metadata TEXT NULL, -- JSON object, serialized as text
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Append-only transcript chunks from the meeting-bot webhook.
pub const TRANSCRIPTS_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS meeting_transcripts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bot_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    transcript_text TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_meeting_transcripts_bot_user ON meeting_transcripts(bot_id, user_id);
"#;

/// Full schema: every provider's credential table, then transcripts.
pub fn sqlite_init() -> String {
    let mut ddl: String = Provider::ALL
        .iter()
        .map(|p| CREDENTIAL_TABLE.replace("{table}", p.table()))
        .collect();
    ddl.push_str(TRANSCRIPTS_INIT);
    ddl
}
