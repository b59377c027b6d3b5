use super::provider::Provider;
use chrono::{DateTime, TimeDelta, Utc};
use oauth2::{AccessToken, RefreshToken};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Identifies the single credential slot of one user for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub user_id: String,
    pub provider: Provider,
}

impl CredentialKey {
    pub fn new(user_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.user_id)
    }
}

/// Delegated credential stored for one (user, provider) pair.
#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: String,
    pub provider: Provider,
    pub provider_account_email: Option<String>,
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub provider_metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(self.user_id.clone(), self.provider)
    }

    /// True when the access token is expired or expires within `skew`.
    /// A credential without expiry metadata is never stale; it is only
    /// refreshed after the provider rejects it.
    pub fn is_stale(&self, now: DateTime<Utc>, skew: TimeDelta) -> bool {
        let horizon = now.checked_add_signed(skew).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.token_expiry.is_some_and(|expiry| expiry <= horizon)
    }
}

/// Longest lifetime the relay records for a token. Providers that report
/// more are held to this.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Token endpoint answer, normalized across providers.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    /// Lifetime reported by the provider, or the provider's documented
    /// default when the response carried none.
    pub expires_in: Option<TimeDelta>,
    pub id_token: Option<String>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: AccessToken::new(access_token.into()),
            refresh_token: None,
            expires_in: None,
            id_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(RefreshToken::new(refresh_token.into()));
        self
    }

    pub fn with_expires_in(mut self, expires_in: TimeDelta) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Absolute expiry for a grant received at `now`. Negative lifetimes
    /// count as already expired and oversized ones are capped at
    /// [`MAX_TOKEN_LIFETIME_SECS`].
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lifetime = self.expires_in?.clamp(TimeDelta::zero(), max_token_lifetime());
        Some(now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

pub fn max_token_lifetime() -> TimeDelta {
    TimeDelta::try_seconds(MAX_TOKEN_LIFETIME_SECS).unwrap_or(TimeDelta::MAX)
}

/// Who the provider says the connected account is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountIdentity {
    pub email: Option<String>,
    /// Team, workspace, tenant or account id; opaque to the relay.
    pub metadata: Option<Value>,
}

/// Returned to the routing layer after a successful exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionResult {
    pub user_id: String,
    pub provider: Provider,
    pub provider_account_email: Option<String>,
    pub provider_metadata: Option<Value>,
    pub status: &'static str,
}

impl From<&Credential> for ConnectionResult {
    fn from(c: &Credential) -> Self {
        Self {
            user_id: c.user_id.clone(),
            provider: c.provider,
            provider_account_email: c.provider_account_email.clone(),
            provider_metadata: c.provider_metadata.clone(),
            status: "connected",
        }
    }
}

/// Token-free view of a connection, safe to hand to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub provider: Provider,
    pub provider_account_email: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for ConnectionSummary {
    fn from(c: &Credential) -> Self {
        Self {
            provider: c.provider,
            provider_account_email: c.provider_account_email.clone(),
            token_expiry: c.token_expiry,
            has_refresh_token: c.refresh_token.is_some(),
            connected_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}
