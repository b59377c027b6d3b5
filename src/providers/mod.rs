pub mod endpoints;
pub mod http;
pub mod identity;

pub use endpoints::ProviderEndpoints;
pub use http::{HttpProviderClient, build_http_client};

use crate::config::Config;
use crate::error::RelayError;
use crate::types::{AccountIdentity, Provider, ProviderRequest, ProviderResponse, TokenGrant};

use async_trait::async_trait;
use oauth2::{AccessToken, RefreshToken};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Everything the relay needs from one OAuth provider.
///
/// `send` reports any HTTP status as `Ok`; only transport failures are
/// errors. Status classification belongs to the resilient caller.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether a connection without a resolved account email is rejected.
    fn identity_required(&self) -> bool;

    fn authorize_url(&self, user_id: &str) -> Result<Url, RelayError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, RelayError>;

    async fn refresh_token(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, RelayError>;

    async fn fetch_identity(&self, access_token: &AccessToken) -> Result<AccountIdentity, RelayError>;

    async fn send(
        &self,
        request: &ProviderRequest,
        access_token: &AccessToken,
    ) -> Result<ProviderResponse, RelayError>;
}

/// Enabled providers. A provider without configuration is absent and every
/// operation on it fails with `ProviderDisabled`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn from_config(cfg: &Config, http: reqwest::Client) -> Result<Self, RelayError> {
        let mut registry = Self::default();
        for provider in Provider::ALL {
            let Some(settings) = cfg.providers.get(&provider) else {
                continue;
            };
            let client = HttpProviderClient::new(provider, settings.clone(), http.clone())?;
            registry = registry.with_client(Arc::new(client));
            info!(%provider, "provider enabled");
        }
        Ok(registry)
    }

    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderClient>, RelayError> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or(RelayError::ProviderDisabled(provider))
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut list: Vec<Provider> = self.clients.keys().copied().collect();
        list.sort();
        list
    }
}
