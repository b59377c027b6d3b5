use super::ProviderClient;
use super::endpoints::{ApiAuth, ClientAuth, ProviderEndpoints};
use super::identity::parse_identity;
use crate::config::{HttpConfig, ProviderSettings};
use crate::error::RelayError;
use crate::types::{
    AccountIdentity, Provider, ProviderRequest, ProviderResponse, TokenGrant, max_token_lifetime,
};

use async_trait::async_trait;
use chrono::TimeDelta;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use oauth2::{AccessToken, RefreshToken};
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Shared outbound client. Timeouts here bound a single attempt at the
/// socket level; the resilient caller adds its own per-attempt deadline.
pub fn build_http_client(cfg: &HttpConfig) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.request_timeout_secs));
    if let Some(proxy_url) = cfg.proxy.as_ref() {
        let proxy = reqwest::Proxy::all(proxy_url.as_str())?;
        builder = builder.proxy(proxy);
    }
    Ok(builder.build()?)
}

/// Token endpoint body. Providers disagree on whether `expires_in` is a
/// number or a string, so both are accepted.
#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// `ProviderClient` over real HTTP endpoints.
pub struct HttpProviderClient {
    endpoints: ProviderEndpoints,
    settings: ProviderSettings,
    http: reqwest::Client,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl HttpProviderClient {
    pub fn new(
        provider: Provider,
        settings: ProviderSettings,
        http: reqwest::Client,
    ) -> Result<Self, RelayError> {
        let endpoints = ProviderEndpoints::for_settings(provider, &settings)?;
        let limiter = settings
            .rate_limit_per_minute
            .and_then(NonZeroU32::new)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));
        Ok(Self {
            endpoints,
            settings,
            http,
            limiter,
        })
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    fn provider_id(&self) -> Provider {
        self.endpoints.provider
    }

    fn unreachable(&self, e: reqwest::Error) -> RelayError {
        let reason = if e.is_timeout() {
            format!("timed out: {e}")
        } else if e.is_connect() {
            format!("connection failed: {e}")
        } else {
            e.to_string()
        };
        RelayError::ProviderUnreachable {
            provider: self.provider_id(),
            reason,
        }
    }

    fn with_token(&self, builder: RequestBuilder, token: &AccessToken) -> RequestBuilder {
        match self.endpoints.api_auth {
            ApiAuth::Bearer => builder.bearer_auth(token.secret()),
            ApiAuth::Raw => builder.header(AUTHORIZATION, token.secret()),
        }
    }

    /// POST a form to the token endpoint and hand back the raw answer
    /// without judging it.
    async fn post_token_form(
        &self,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<ProviderResponse, RelayError> {
        let mut builder = self
            .http
            .post(self.endpoints.token_url.clone())
            .header(ACCEPT, "application/json");
        match self.endpoints.client_auth {
            ClientAuth::BasicHeader => {
                builder = builder.basic_auth(
                    &self.settings.client_id,
                    Some(self.settings.client_secret.secret()),
                );
            }
            ClientAuth::RequestBody => {
                form.push(("client_id", self.settings.client_id.clone()));
                form.push(("client_secret", self.settings.client_secret.secret().clone()));
            }
        }
        let resp = builder
            .form(&form)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let status = resp.status();
        let retry_after = retry_after_secs(&resp);
        let body = resp.text().await.map_err(|e| self.unreachable(e))?;
        Ok(ProviderResponse {
            status,
            retry_after,
            body,
        })
    }

    fn parse_grant(&self, body: &str) -> Result<TokenGrant, RelayError> {
        let raw: RawTokenResponse =
            serde_json::from_str(body).map_err(|e| RelayError::InvalidResponse {
                provider: self.provider_id(),
                detail: format!("token response is not JSON: {e}"),
            })?;
        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::InvalidResponse {
                provider: self.provider_id(),
                detail: "token response has no access_token".to_string(),
            })?;
        Ok(TokenGrant {
            access_token: AccessToken::new(access_token),
            refresh_token: raw
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(RefreshToken::new),
            expires_in: raw
                .expires_in
                .map(|secs| TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX))
                .map(|lifetime| lifetime.clamp(TimeDelta::zero(), max_token_lifetime()))
                .or(self.endpoints.default_lifetime),
            id_token: raw.id_token,
        })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn provider(&self) -> Provider {
        self.provider_id()
    }

    fn identity_required(&self) -> bool {
        self.endpoints.identity_required
    }

    fn authorize_url(&self, user_id: &str) -> Result<Url, RelayError> {
        self.endpoints.authorize_url(&self.settings, user_id)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, RelayError> {
        let mut form = vec![
            ("code", code.to_string()),
            ("redirect_uri", self.settings.redirect_uri.to_string()),
        ];
        if self.endpoints.grant_type_on_exchange {
            form.push(("grant_type", "authorization_code".to_string()));
        }
        let ProviderResponse { status, body, .. } = self.post_token_form(form).await?;
        if !status.is_success() {
            return Err(RelayError::ExchangeFailed {
                provider: self.provider_id(),
                status: status.as_u16(),
                body,
            });
        }
        let grant = self.parse_grant(&body)?;
        info!(provider = %self.provider_id(), "authorization code exchanged");
        Ok(grant)
    }

    async fn refresh_token(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, RelayError> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.secret().clone()),
        ];
        if self.endpoints.redirect_uri_on_refresh {
            form.push(("redirect_uri", self.settings.redirect_uri.to_string()));
        }
        let ProviderResponse {
            status,
            retry_after,
            body,
        } = self.post_token_form(form).await?;
        // Throttling and timeouts say nothing about the refresh token itself.
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RelayError::RateLimited {
                provider: self.provider_id(),
                retry_after,
            });
        }
        if status == StatusCode::REQUEST_TIMEOUT {
            return Err(RelayError::ProviderUnreachable {
                provider: self.provider_id(),
                reason: "token endpoint answered 408 Request Timeout".to_string(),
            });
        }
        if status.is_server_error() {
            return Err(RelayError::ProviderError {
                provider: self.provider_id(),
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            debug!(provider = %self.provider_id(), %status, body = %body, "refresh rejected");
            return Err(RelayError::RefreshFailed {
                provider: self.provider_id(),
                status: status.as_u16(),
            });
        }
        self.parse_grant(&body)
    }

    async fn fetch_identity(&self, access_token: &AccessToken) -> Result<AccountIdentity, RelayError> {
        let url = self.endpoints.identity_url.clone();
        let builder = match self.endpoints.identity_query {
            Some(query) => self.http.post(url).json(&json!({ "query": query })),
            None => self.http.get(url),
        };
        let resp = self
            .with_token(builder, access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.unreachable(e))?;
        if !status.is_success() {
            return Err(RelayError::ProviderError {
                provider: self.provider_id(),
                status: status.as_u16(),
                body,
            });
        }
        let value: Value = serde_json::from_str(&body).map_err(|e| RelayError::InvalidResponse {
            provider: self.provider_id(),
            detail: format!("identity response is not JSON: {e}"),
        })?;
        Ok(parse_identity(self.provider_id(), &value))
    }

    async fn send(
        &self,
        request: &ProviderRequest,
        access_token: &AccessToken,
    ) -> Result<ProviderResponse, RelayError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let url = self.endpoints.resolve(&request.target)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let resp = self
            .with_token(builder, access_token)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let status = resp.status();
        let retry_after = retry_after_secs(&resp);
        let body = resp.text().await.map_err(|e| self.unreachable(e))?;
        debug!(provider = %self.provider_id(), method = %request.method, path = %request.target, %status, "provider responded");
        Ok(ProviderResponse {
            status,
            retry_after,
            body,
        })
    }
}
