use crate::error::RelayError;
use crate::middleware::RequireKeyAuth;
use crate::router::RelayState;
use crate::types::{ConnectionSummary, Provider, ProviderAction};
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

/// GET /integrations/{user_id} -> the user's connections, without tokens.
pub async fn list_integrations(
    _auth: RequireKeyAuth,
    State(state): State<RelayState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, RelayError> {
    let credentials = state.store.list_for_user(&user_id).await?;
    let integrations: Vec<ConnectionSummary> =
        credentials.iter().map(ConnectionSummary::from).collect();
    Ok(Json(json!({
        "user_id": user_id,
        "integrations": integrations,
    })))
}

/// POST /actions/{provider}/{user_id} -> performs the action and relays the provider's JSON.
pub async fn provider_action(
    _auth: RequireKeyAuth,
    State(state): State<RelayState>,
    Path((provider, user_id)): Path<(Provider, String)>,
    Json(action): Json<ProviderAction>,
) -> Result<Json<Value>, RelayError> {
    let response = state.caller.call_action(&user_id, provider, &action).await?;
    if response.body.trim().is_empty() {
        return Ok(Json(Value::Null));
    }
    let body: Value = response.json().map_err(|e| RelayError::InvalidResponse {
        provider,
        detail: e.to_string(),
    })?;
    Ok(Json(body))
}
