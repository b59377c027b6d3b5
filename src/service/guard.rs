use crate::clock::Clock;
use crate::config::RefreshConfig;
use crate::db::CredentialStore;
use crate::error::RelayError;
use crate::service::refresher::TokenRefresher;
use crate::types::{CredentialKey, Provider};

use chrono::TimeDelta;
use oauth2::AccessToken;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

type RefreshReply = RpcReplyPort<Result<AccessToken, RelayError>>;

/// Messages handled by the refresh coordinator.
#[derive(Debug)]
pub enum GuardMessage {
    /// Produce a fresh token for the key. The optional token is the one the
    /// provider rejected; a stored token that differs from it is reused.
    Refresh(CredentialKey, Option<AccessToken>, RefreshReply),

    // Internal messages (sent by the flight task)
    /// A refresh flight finished; answer every waiter.
    RefreshComplete(CredentialKey, Result<AccessToken, RelayError>),
}

/// Hands out valid access tokens, refreshing at most once per
/// (user, provider) at a time.
///
/// Fresh tokens are read straight from the store. Stale tokens and forced
/// refreshes are routed through an actor that keeps one flight per key;
/// later callers for the same key wait on that flight's result.
#[derive(Clone)]
pub struct CredentialGuard {
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    skew: TimeDelta,
    actor: ActorRef<GuardMessage>,
}

impl CredentialGuard {
    pub async fn spawn(
        store: CredentialStore,
        refresher: TokenRefresher,
        clock: Arc<dyn Clock>,
        cfg: &RefreshConfig,
    ) -> Result<Self, RelayError> {
        let skew = cfg.skew();
        let flight = FlightContext {
            store: store.clone(),
            refresher,
            clock: clock.clone(),
            skew,
        };
        let (actor, _jh) = Actor::spawn(None, RefreshCoordinator, flight)
            .await
            .map_err(|e| RelayError::Actor(format!("failed to spawn refresh coordinator: {e}")))?;
        Ok(Self {
            store,
            clock,
            skew,
            actor,
        })
    }

    /// A currently valid access token for the pair, refreshing first when the
    /// stored one is expired or about to expire.
    pub async fn get_valid_access_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<AccessToken, RelayError> {
        let credential = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or_else(|| RelayError::NotConnected {
                provider,
                user_id: user_id.to_string(),
            })?;
        if !credential.is_stale(self.clock.now(), self.skew) {
            return Ok(credential.access_token);
        }
        debug!(%provider, %user_id, "stored token is stale");
        self.request_refresh(credential.key(), None).await
    }

    /// Refresh after the provider rejected `rejected`, regardless of the
    /// stored expiry.
    pub async fn force_refresh(
        &self,
        user_id: &str,
        provider: Provider,
        rejected: &AccessToken,
    ) -> Result<AccessToken, RelayError> {
        self.request_refresh(CredentialKey::new(user_id, provider), Some(rejected.clone()))
            .await
    }

    async fn request_refresh(
        &self,
        key: CredentialKey,
        rejected: Option<AccessToken>,
    ) -> Result<AccessToken, RelayError> {
        ractor::call!(self.actor, GuardMessage::Refresh, key, rejected)
            .map_err(|e| RelayError::Actor(format!("Refresh RPC failed: {e}")))?
    }
}

/// Everything a refresh flight needs, cloned into each spawned task.
#[derive(Clone)]
struct FlightContext {
    store: CredentialStore,
    refresher: TokenRefresher,
    clock: Arc<dyn Clock>,
    skew: TimeDelta,
}

impl FlightContext {
    async fn run(
        self,
        key: CredentialKey,
        rejected: Option<AccessToken>,
    ) -> Result<AccessToken, RelayError> {
        let CredentialKey { user_id, provider } = &key;
        let credential =
            self.store
                .get(user_id, *provider)
                .await?
                .ok_or_else(|| RelayError::NotConnected {
                    provider: *provider,
                    user_id: user_id.clone(),
                })?;

        // An earlier flight may already have replaced the token we were asked about.
        let superseded = match &rejected {
            Some(token) => token.secret() != credential.access_token.secret(),
            None => true,
        };
        if superseded && !credential.is_stale(self.clock.now(), self.skew) {
            debug!(%key, "token already refreshed; reusing");
            return Ok(credential.access_token);
        }

        let grant = self.refresher.refresh(&credential).await?;
        let updated = self
            .store
            .apply_refresh(user_id, *provider, &grant, self.clock.now())
            .await
            .inspect_err(|e| error!(%key, "persisting refreshed token failed: {}", e))?;
        info!(
            %provider,
            %user_id,
            expiry = ?updated.token_expiry,
            rotated = grant.refresh_token.is_some(),
            "access token refreshed"
        );
        Ok(updated.access_token)
    }
}

struct CoordinatorState {
    flight: FlightContext,
    in_flight: HashMap<CredentialKey, Vec<RefreshReply>>,
}

struct RefreshCoordinator;

#[ractor::async_trait]
impl Actor for RefreshCoordinator {
    type Msg = GuardMessage;
    type State = CoordinatorState;
    type Arguments = FlightContext;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        flight: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(CoordinatorState {
            flight,
            in_flight: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            GuardMessage::Refresh(key, rejected, reply) => {
                if let Some(waiters) = state.in_flight.get_mut(&key) {
                    debug!(%key, waiters = waiters.len(), "joining in-flight refresh");
                    waiters.push(reply);
                    return Ok(());
                }
                state.in_flight.insert(key.clone(), vec![reply]);

                // The flight runs detached so a caller giving up never cancels
                // the provider call or the write that follows it.
                // Waiters are always answered, even when the flight panics.
                let flight = state.flight.clone();
                let me = myself.clone();
                tokio::spawn(async move {
                    let task = tokio::spawn(flight.run(key.clone(), rejected));
                    let result = match task.await {
                        Ok(result) => result,
                        Err(e) => {
                            error!(%key, "refresh flight aborted: {}", e);
                            Err(RelayError::Actor(format!("refresh flight aborted: {e}")))
                        }
                    };
                    let _ = ractor::cast!(me, GuardMessage::RefreshComplete(key, result));
                });
            }
            GuardMessage::RefreshComplete(key, result) => {
                let Some(waiters) = state.in_flight.remove(&key) else {
                    return Ok(());
                };
                if let Err(e) = &result {
                    info!(%key, kind = %e.kind(), "refresh failed: {}", e);
                }
                for reply in waiters {
                    let _ = reply.send(result.clone());
                }
            }
        }
        Ok(())
    }
}
