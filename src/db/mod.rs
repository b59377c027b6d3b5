//! SQLite persistence for credentials and meeting transcripts.
//!
//! - `schema.rs`: DDL, one credential table per provider
//! - `models.rs`: row structs and their conversion into domain types
//! - `sqlite.rs`: pool setup, `CredentialStore`, `TranscriptStore`

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::DbCredential;
pub use schema::sqlite_init;
pub use sqlite::{CredentialStore, SqlitePool, TranscriptStore, connect, init_schema};
