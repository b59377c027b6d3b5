#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use credential_relay::clock::{Clock, ManualClock};
use credential_relay::config::Config;
use credential_relay::db::{CredentialStore, SqlitePool, TranscriptStore, init_schema};
use credential_relay::error::RelayError;
use credential_relay::providers::{ProviderClient, ProviderRegistry};
use credential_relay::router::RelayState;
use credential_relay::service::{CredentialGuard, OAuthExchanger, ResilientCaller, TokenRefresher};
use credential_relay::types::{
    AccountIdentity, Provider, ProviderRequest, ProviderResponse, TokenGrant,
};
use oauth2::{AccessToken, RefreshToken};
use reqwest::StatusCode;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    init_schema(&pool).await.expect("schema");
    pool
}

/// Scripted provider. Each queue is consumed front to back; an empty queue
/// falls back to a benign default.
pub struct FakeProvider {
    provider: Provider,
    identity_required: bool,
    exchange: Mutex<VecDeque<Result<TokenGrant, RelayError>>>,
    refresh: Mutex<VecDeque<Result<TokenGrant, RelayError>>>,
    identity: Mutex<Result<AccountIdentity, RelayError>>,
    responses: Mutex<VecDeque<Result<ProviderResponse, RelayError>>>,
    refresh_delay: Duration,
    send_delay: Duration,
    panic_next_refresh: AtomicBool,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub sent_tokens: Mutex<Vec<String>>,
    pub send_times: Mutex<Vec<Instant>>,
    pub refreshed_with: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            identity_required: false,
            exchange: Mutex::new(VecDeque::new()),
            refresh: Mutex::new(VecDeque::new()),
            identity: Mutex::new(Ok(AccountIdentity::default())),
            responses: Mutex::new(VecDeque::new()),
            refresh_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
            panic_next_refresh: AtomicBool::new(false),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            sent_tokens: Mutex::new(Vec::new()),
            send_times: Mutex::new(Vec::new()),
            refreshed_with: Mutex::new(Vec::new()),
        }
    }

    pub fn identity_required(mut self) -> Self {
        self.identity_required = true;
        self
    }

    pub fn with_exchange(self, result: Result<TokenGrant, RelayError>) -> Self {
        self.exchange.lock().unwrap().push_back(result);
        self
    }

    pub fn with_refresh(self, result: Result<TokenGrant, RelayError>) -> Self {
        self.refresh.lock().unwrap().push_back(result);
        self
    }

    pub fn with_identity(self, result: Result<AccountIdentity, RelayError>) -> Self {
        *self.identity.lock().unwrap() = result;
        self
    }

    pub fn with_email(self, email: &str) -> Self {
        self.with_identity(Ok(AccountIdentity {
            email: Some(email.to_string()),
            metadata: None,
        }))
    }

    pub fn with_status(self, status: u16, body: &str) -> Self {
        let status = StatusCode::from_u16(status).unwrap();
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(ProviderResponse::new(status, body)));
        self
    }

    pub fn with_send_error(self, err: RelayError) -> Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// The next refresh panics instead of answering.
    pub fn with_refresh_panic(self) -> Self {
        self.panic_next_refresh.store(true, Ordering::SeqCst);
        self
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive `send` calls.
    pub fn send_gaps(&self) -> Vec<Duration> {
        let times = self.send_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn identity_required(&self) -> bool {
        self.identity_required
    }

    fn authorize_url(&self, user_id: &str) -> Result<Url, RelayError> {
        let mut url = Url::parse("https://consent.example/authorize")?;
        url.query_pairs_mut().append_pair("state", user_id);
        Ok(url)
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenGrant, RelayError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.exchange
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TokenGrant::new("exchanged")))
    }

    async fn refresh_token(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, RelayError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refreshed_with
            .lock()
            .unwrap()
            .push(refresh_token.secret().clone());
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if self.panic_next_refresh.swap(false, Ordering::SeqCst) {
            panic!("provider client crashed mid-refresh");
        }
        let next = self.refresh.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(RelayError::RefreshFailed {
                provider: self.provider,
                status: 400,
            })
        })
    }

    async fn fetch_identity(&self, _access_token: &AccessToken) -> Result<AccountIdentity, RelayError> {
        self.identity.lock().unwrap().clone()
    }

    async fn send(
        &self,
        _request: &ProviderRequest,
        access_token: &AccessToken,
    ) -> Result<ProviderResponse, RelayError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.send_times.lock().unwrap().push(Instant::now());
        self.sent_tokens
            .lock()
            .unwrap()
            .push(access_token.secret().clone());
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ProviderResponse::new(StatusCode::OK, "{}")))
    }
}

/// Every service wired over an in-memory store and a manual clock.
pub struct Harness {
    pub fake: Arc<FakeProvider>,
    pub store: CredentialStore,
    pub transcripts: TranscriptStore,
    pub clock: ManualClock,
    pub guard: CredentialGuard,
    pub caller: ResilientCaller,
    pub exchanger: OAuthExchanger,
}

pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.retry.base_delay_ms = 20;
    cfg.retry.max_delay_ms = 1_000;
    cfg.retry.max_retries = 3;
    cfg.retry.call_timeout_secs = 1;
    cfg.refresh.max_retries = 2;
    cfg
}

impl Harness {
    pub async fn new(fake: FakeProvider) -> Self {
        Self::with_config(fake, test_config()).await
    }

    pub async fn with_config(fake: FakeProvider, cfg: Config) -> Self {
        let fake = Arc::new(fake);
        let registry = ProviderRegistry::default().with_client(fake.clone());
        let pool = memory_pool().await;
        let store = CredentialStore::new(pool.clone());
        let transcripts = TranscriptStore::new(pool);
        let clock = ManualClock::new(t0());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let refresher = TokenRefresher::new(registry.clone(), &cfg);
        let guard = CredentialGuard::spawn(store.clone(), refresher, shared_clock.clone(), &cfg.refresh)
            .await
            .expect("spawn guard");
        let caller = ResilientCaller::new(registry.clone(), guard.clone(), cfg.retry.clone());
        let exchanger = OAuthExchanger::new(registry, store.clone(), shared_clock);
        Self {
            fake,
            store,
            transcripts,
            clock,
            guard,
            caller,
            exchanger,
        }
    }

    pub fn state(&self, relay_key: &str) -> RelayState {
        RelayState::new(
            self.exchanger.clone(),
            self.caller.clone(),
            self.store.clone(),
            self.transcripts.clone(),
            Arc::new(self.clock.clone()),
            Arc::from(relay_key),
        )
    }

    /// Store a credential directly, as a completed exchange would.
    pub async fn seed(
        &self,
        user_id: &str,
        access: &str,
        refresh: Option<&str>,
        lifetime: Option<TimeDelta>,
    ) {
        let mut grant = TokenGrant::new(access);
        if let Some(r) = refresh {
            grant = grant.with_refresh_token(r);
        }
        grant.expires_in = lifetime;
        self.store
            .bind_exchange(
                user_id,
                self.fake.provider(),
                &grant,
                &AccountIdentity::default(),
                self.clock.now(),
            )
            .await
            .expect("seed credential");
    }
}
