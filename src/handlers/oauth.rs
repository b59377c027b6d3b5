use crate::error::RelayError;
use crate::router::RelayState;
use crate::types::{ConnectionResult, Provider};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied consent.
    pub error: Option<String>,
}

/// GET /auth/{provider}/authorize/{user_id} -> consent URL carrying the user id as `state`.
pub async fn authorize(
    State(state): State<RelayState>,
    Path((provider, user_id)): Path<(Provider, String)>,
) -> Result<Json<Value>, RelayError> {
    let url = state.exchanger.authorize_url(provider, &user_id)?;
    info!(%provider, %user_id, "authorization url issued");
    Ok(Json(json!({
        "provider": provider,
        "user_id": user_id,
        "auth_url": url.as_str(),
    })))
}

/// GET /auth/{provider}/callback -> exchanges the code and binds the account.
pub async fn callback(
    State(state): State<RelayState>,
    Path(provider): Path<Provider>,
    Query(query): Query<AuthCallbackQuery>,
) -> Result<Json<ConnectionResult>, RelayError> {
    if let Some(err) = query.error.as_deref() {
        return Err(RelayError::InvalidRequest(format!(
            "{provider} authorization was not granted: {err}"
        )));
    }
    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest("missing `code` in callback".to_string()))?;
    let user_id = query
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest("missing `state` in callback".to_string()))?;

    let credential = state.exchanger.exchange(provider, code, user_id).await?;
    Ok(Json(ConnectionResult::from(&credential)))
}
