use crate::error::RelayError;
use crate::middleware::RequireKeyAuth;
use crate::router::RelayState;
use crate::types::TranscriptWebhook;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

/// POST /webhooks/transcripts -> always 200 so the bot never redelivers on our account.
pub async fn transcript_webhook(State(state): State<RelayState>, body: Bytes) -> Json<serde_json::Value> {
    let ok = Json(json!({ "status": "ok" }));
    let payload: TranscriptWebhook = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!("transcript webhook body is not valid JSON: {}", e);
            return ok;
        }
    };
    let Some((bot_id, user_id, text)) = payload.into_parts() else {
        debug!("transcript webhook without bot_id or user_id; ignored");
        return ok;
    };
    if let Err(e) = state
        .transcripts
        .append(&bot_id, &user_id, &text, state.clock.now())
        .await
    {
        warn!(%bot_id, %user_id, "storing transcript failed: {}", e);
    }
    ok
}

/// GET /transcripts/{bot_id}/{user_id} -> stored chunks in arrival order.
pub async fn list_transcripts(
    _auth: RequireKeyAuth,
    State(state): State<RelayState>,
    Path((bot_id, user_id)): Path<(String, String)>,
) -> Result<Response, RelayError> {
    let transcripts = state.transcripts.list(&bot_id, &user_id).await?;
    if transcripts.is_empty() {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": "not_found", "message": "no transcripts for this bot and user"}})),
        )
            .into_response());
    }
    Ok(Json(json!({
        "bot_id": bot_id,
        "user_id": user_id,
        "transcripts": transcripts,
    }))
    .into_response())
}
