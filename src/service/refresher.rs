use crate::config::Config;
use crate::error::{IsRetryable, RelayError};
use crate::providers::ProviderRegistry;
use crate::types::{Credential, TokenGrant};

use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::warn;

/// Turns a stored refresh token into a new grant.
///
/// Transient failures (5xx, network) are retried on the configured backoff;
/// a provider rejecting the refresh token is terminal.
#[derive(Clone)]
pub struct TokenRefresher {
    registry: ProviderRegistry,
    policy: ExponentialBuilder,
}

impl TokenRefresher {
    pub fn new(registry: ProviderRegistry, cfg: &Config) -> Self {
        let policy = cfg.retry.backoff().with_max_times(cfg.refresh.max_retries);
        Self { registry, policy }
    }

    /// The returned grant carries a refresh token only when the provider
    /// rotated it; persisting code must keep the old one otherwise.
    pub async fn refresh(&self, credential: &Credential) -> Result<TokenGrant, RelayError> {
        let provider = credential.provider;
        let refresh_token = credential
            .refresh_token
            .as_ref()
            .ok_or(RelayError::NoRefreshToken { provider })?;
        let client = self.registry.get(provider)?;

        (|| async { client.refresh_token(refresh_token).await })
            .retry(self.policy)
            .when(|e: &RelayError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    %provider,
                    user_id = %credential.user_id,
                    delay_ms = dur.as_millis() as u64,
                    "token refresh retrying after error {}", err
                );
            })
            .await
    }
}
