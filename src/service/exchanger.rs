use crate::clock::Clock;
use crate::db::CredentialStore;
use crate::error::RelayError;
use crate::providers::ProviderRegistry;
use crate::providers::identity::email_from_id_token;
use crate::types::{AccountIdentity, Credential, Provider};

use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Authorization code to stored credential.
#[derive(Clone)]
pub struct OAuthExchanger {
    registry: ProviderRegistry,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
}

impl OAuthExchanger {
    pub fn new(registry: ProviderRegistry, store: CredentialStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            store,
            clock,
        }
    }

    /// Consent URL for `user_id`; the id comes back as `state`.
    pub fn authorize_url(&self, provider: Provider, user_id: &str) -> Result<Url, RelayError> {
        self.registry.get(provider)?.authorize_url(user_id)
    }

    /// Exchange `code` once, resolve the account identity, then bind.
    /// Codes are single-use, so a failed exchange is never retried.
    pub async fn exchange(
        &self,
        provider: Provider,
        code: &str,
        user_id: &str,
    ) -> Result<Credential, RelayError> {
        let client = self.registry.get(provider)?;
        let grant = client.exchange_code(code).await?;
        let received_at = self.clock.now();

        let mut identity = match client.fetch_identity(&grant.access_token).await {
            Ok(identity) => identity,
            Err(e) if client.identity_required() && grant.id_token.is_none() => return Err(e),
            Err(e) => {
                warn!(%provider, %user_id, "identity lookup failed, continuing without it: {}", e);
                AccountIdentity::default()
            }
        };
        if identity.email.is_none() {
            identity.email = grant.id_token.as_deref().and_then(email_from_id_token);
        }
        if identity.email.is_none() && client.identity_required() {
            return Err(RelayError::InvalidResponse {
                provider,
                detail: "account email could not be resolved".to_string(),
            });
        }

        let credential = self
            .store
            .bind_exchange(user_id, provider, &grant, &identity, received_at)
            .await
            .inspect_err(|e| {
                if let RelayError::AccountAlreadyBound { email, .. } = e {
                    warn!(%provider, %user_id, %email, "account already bound to another user");
                }
            })?;
        info!(
            %provider,
            %user_id,
            email = credential.provider_account_email.as_deref().unwrap_or("-"),
            "provider connected"
        );
        Ok(credential)
    }
}
