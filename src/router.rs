use crate::clock::Clock;
use crate::db::{CredentialStore, TranscriptStore};
use crate::handlers::{actions, oauth, transcripts};
use crate::service::{OAuthExchanger, ResilientCaller};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;

const BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct RelayState {
    pub exchanger: OAuthExchanger,
    pub caller: ResilientCaller,
    pub store: CredentialStore,
    pub transcripts: TranscriptStore,
    pub clock: Arc<dyn Clock>,
    pub relay_key: Arc<str>,
}

impl RelayState {
    pub fn new(
        exchanger: OAuthExchanger,
        caller: ResilientCaller,
        store: CredentialStore,
        transcripts: TranscriptStore,
        clock: Arc<dyn Clock>,
        relay_key: Arc<str>,
    ) -> Self {
        Self {
            exchanger,
            caller,
            store,
            transcripts,
            clock,
            relay_key,
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/{provider}/authorize/{user_id}", get(oauth::authorize))
        .route("/auth/{provider}/callback", get(oauth::callback))
        .route("/integrations/{user_id}", get(actions::list_integrations))
        .route("/actions/{provider}/{user_id}", post(actions::provider_action))
        .route("/webhooks/transcripts", post(transcripts::transcript_webhook))
        .route("/transcripts/{bot_id}/{user_id}", get(transcripts::list_transcripts))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}
