use crate::types::{Credential, Provider};
use chrono::{DateTime, Utc};
use oauth2::{AccessToken, RefreshToken};
use serde_json::Value;

/// A credential row as stored, before it is tagged with its provider.
#[derive(Debug, Clone, PartialEq)]
pub struct DbCredential {
    pub user_id: String,
    pub provider_account_email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub provider_metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbCredential {
    pub fn into_credential(self, provider: Provider) -> Credential {
        Credential {
            user_id: self.user_id,
            provider,
            provider_account_email: self.provider_account_email,
            access_token: AccessToken::new(self.access_token),
            refresh_token: self.refresh_token.map(RefreshToken::new),
            token_expiry: self.token_expiry,
            provider_metadata: self.provider_metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
