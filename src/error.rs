use crate::types::Provider;
use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error as ThisError;

#[derive(Debug, Clone, ThisError)]
pub enum RelayError {
    #[error("{provider} token exchange failed with status {status}: {body}")]
    ExchangeFailed {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{provider} account {email} is already connected to another user")]
    AccountAlreadyBound { provider: Provider, email: String },

    #[error("{provider} rejected the refresh token with status {status}")]
    RefreshFailed { provider: Provider, status: u16 },

    #[error("{provider} credential has no refresh token; re-authorization required")]
    NoRefreshToken { provider: Provider },

    #[error("{provider} is not connected for user {user_id}")]
    NotConnected { provider: Provider, user_id: String },

    #[error("{provider} rate limit persisted after retries")]
    RateLimited {
        provider: Provider,
        retry_after: Option<u64>,
    },

    #[error("{provider} rejected the access token after a refresh; re-authorization required")]
    Unauthorized { provider: Provider },

    #[error("{provider} returned status {status}: {body}")]
    ProviderError {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{provider} is unreachable: {reason}")]
    ProviderUnreachable { provider: Provider, reason: String },

    #[error("{0} is not configured")]
    ProviderDisabled(Provider),

    #[error("unsupported action for {provider}: {detail}")]
    UnsupportedAction { provider: Provider, detail: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected {provider} response: {detail}")]
    InvalidResponse { provider: Provider, detail: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Http(#[source] Arc<reqwest::Error>),

    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    #[error("Database error: {0}")]
    Database(#[source] Arc<SqlxError>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ractor error: {0}")]
    Actor(String),
}

impl From<SqlxError> for RelayError {
    fn from(e: SqlxError) -> Self {
        RelayError::Database(Arc::new(e))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Json(Arc::new(e))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Http(Arc::new(e))
    }
}

impl From<figment::Error> for RelayError {
    fn from(e: figment::Error) -> Self {
        RelayError::Config(e.to_string())
    }
}

/// Stable, client-facing failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ExchangeFailed,
    AccountAlreadyBound,
    RefreshFailed,
    NoRefreshToken,
    NotConnected,
    RateLimited,
    Unauthorized,
    ProviderError,
    ProviderUnreachable,
    ProviderDisabled,
    UnsupportedAction,
    InvalidRequest,
    InvalidResponse,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ExchangeFailed => "exchange_failed",
            ErrorKind::AccountAlreadyBound => "account_already_bound",
            ErrorKind::RefreshFailed => "refresh_failed",
            ErrorKind::NoRefreshToken => "no_refresh_token",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::ProviderUnreachable => "provider_unreachable",
            ErrorKind::ProviderDisabled => "provider_disabled",
            ErrorKind::UnsupportedAction => "unsupported_action",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// The user has to go through the consent screen again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            ErrorKind::RefreshFailed
                | ErrorKind::NoRefreshToken
                | ErrorKind::Unauthorized
                | ErrorKind::NotConnected
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::ExchangeFailed { .. } => ErrorKind::ExchangeFailed,
            RelayError::AccountAlreadyBound { .. } => ErrorKind::AccountAlreadyBound,
            RelayError::RefreshFailed { .. } => ErrorKind::RefreshFailed,
            RelayError::NoRefreshToken { .. } => ErrorKind::NoRefreshToken,
            RelayError::NotConnected { .. } => ErrorKind::NotConnected,
            RelayError::RateLimited { .. } => ErrorKind::RateLimited,
            RelayError::Unauthorized { .. } => ErrorKind::Unauthorized,
            RelayError::ProviderError { .. } => ErrorKind::ProviderError,
            RelayError::ProviderUnreachable { .. } => ErrorKind::ProviderUnreachable,
            RelayError::ProviderDisabled(_) => ErrorKind::ProviderDisabled,
            RelayError::UnsupportedAction { .. } => ErrorKind::UnsupportedAction,
            RelayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RelayError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            RelayError::UrlParse(_)
            | RelayError::Http(_)
            | RelayError::Json(_)
            | RelayError::Database(_)
            | RelayError::Config(_)
            | RelayError::Actor(_) => ErrorKind::Internal,
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            RelayError::ExchangeFailed { provider, .. }
            | RelayError::AccountAlreadyBound { provider, .. }
            | RelayError::RefreshFailed { provider, .. }
            | RelayError::NoRefreshToken { provider }
            | RelayError::NotConnected { provider, .. }
            | RelayError::RateLimited { provider, .. }
            | RelayError::Unauthorized { provider }
            | RelayError::ProviderError { provider, .. }
            | RelayError::ProviderUnreachable { provider, .. }
            | RelayError::UnsupportedAction { provider, .. }
            | RelayError::InvalidResponse { provider, .. } => Some(*provider),
            RelayError::ProviderDisabled(provider) => Some(*provider),
            _ => None,
        }
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for RelayError {
    fn is_retryable(&self) -> bool {
        match self {
            RelayError::RateLimited { .. } | RelayError::ProviderUnreachable { .. } => true,
            RelayError::ProviderError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::ExchangeFailed | ErrorKind::UnsupportedAction | ErrorKind::InvalidRequest => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::AccountAlreadyBound => StatusCode::CONFLICT,
            ErrorKind::RefreshFailed | ErrorKind::NoRefreshToken | ErrorKind::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            ErrorKind::NotConnected => StatusCode::NOT_FOUND,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ProviderError | ErrorKind::InvalidResponse => StatusCode::BAD_GATEWAY,
            ErrorKind::ProviderUnreachable | ErrorKind::ProviderDisabled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match kind {
            ErrorKind::Internal => {
                tracing::error!(error = %self, "internal error while serving request");
                "An internal server error occurred.".to_string()
            }
            _ => self.to_string(),
        };
        let body = ApiErrorBody {
            code: kind.as_str(),
            provider: self.provider(),
            reauthorize: kind.requires_reauthorization(),
            message,
        };
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    pub reauthorize: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
