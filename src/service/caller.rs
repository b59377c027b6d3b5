use crate::config::RetryConfig;
use crate::error::{IsRetryable, RelayError};
use crate::providers::{ProviderClient, ProviderRegistry};
use crate::service::guard::CredentialGuard;
use crate::types::{Provider, ProviderAction, ProviderRequest, ProviderResponse};

use backon::Retryable;
use oauth2::AccessToken;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{info, warn};

/// Outbound provider calls with a per-attempt timeout, exponential backoff
/// on 429, 5xx and network failures, and one refresh-and-retry on 401.
#[derive(Clone)]
pub struct ResilientCaller {
    registry: ProviderRegistry,
    guard: CredentialGuard,
    retry: RetryConfig,
}

impl ResilientCaller {
    pub fn new(registry: ProviderRegistry, guard: CredentialGuard, retry: RetryConfig) -> Self {
        Self {
            registry,
            guard,
            retry,
        }
    }

    pub fn guard(&self) -> &CredentialGuard {
        &self.guard
    }

    /// Shape `action` for the provider and perform it.
    pub async fn call_action(
        &self,
        user_id: &str,
        provider: Provider,
        action: &ProviderAction,
    ) -> Result<ProviderResponse, RelayError> {
        let request = action.to_request(provider)?;
        info!(%provider, %user_id, action = action.name(), "calling provider");
        self.call(user_id, provider, &request).await
    }

    pub async fn call(
        &self,
        user_id: &str,
        provider: Provider,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, RelayError> {
        let client = self.registry.get(provider)?;
        let token = self.guard.get_valid_access_token(user_id, provider).await?;

        let response = self.send_with_backoff(client.as_ref(), request, &token).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // The provider's verdict beats our expiry bookkeeping: refresh once.
        info!(%provider, %user_id, "provider rejected access token; forcing refresh");
        let fresh = self.guard.force_refresh(user_id, provider, &token).await?;
        let response = self.send_with_backoff(client.as_ref(), request, &fresh).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            warn!(%provider, %user_id, "refreshed token rejected; re-authorization required");
            return Err(RelayError::Unauthorized { provider });
        }
        Ok(response)
    }

    /// Success and 401 come back as `Ok`; everything else is an error,
    /// retried while it is transient.
    async fn send_with_backoff(
        &self,
        client: &dyn ProviderClient,
        request: &ProviderRequest,
        token: &AccessToken,
    ) -> Result<ProviderResponse, RelayError> {
        let provider = client.provider();
        (|| async { self.attempt(client, request, token).await })
            .retry(self.retry.backoff())
            .when(|e: &RelayError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    %provider,
                    path = %request.target,
                    delay_ms = dur.as_millis() as u64,
                    "provider call retrying after error {}", err
                );
            })
            .await
    }

    async fn attempt(
        &self,
        client: &dyn ProviderClient,
        request: &ProviderRequest,
        token: &AccessToken,
    ) -> Result<ProviderResponse, RelayError> {
        let provider = client.provider();
        let timeout = self.retry.call_timeout();
        let response = match tokio::time::timeout(timeout, client.send(request, token)).await {
            Ok(sent) => sent?,
            Err(_) => {
                return Err(RelayError::ProviderUnreachable {
                    provider,
                    reason: format!("no response within {}s", timeout.as_secs_f32()),
                });
            }
        };
        classify(provider, response)
    }
}

fn classify(provider: Provider, response: ProviderResponse) -> Result<ProviderResponse, RelayError> {
    let status = response.status;
    if status.is_success() || status == StatusCode::UNAUTHORIZED {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RelayError::RateLimited {
            provider,
            retry_after: response.retry_after,
        });
    }
    Err(RelayError::ProviderError {
        provider,
        status: status.as_u16(),
        body: response.body,
    })
}
