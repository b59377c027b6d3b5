pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod providers;
pub mod router;
pub mod service;
pub mod types;

pub use error::RelayError;
pub use service::{CredentialGuard, OAuthExchanger, ResilientCaller, TokenRefresher};
