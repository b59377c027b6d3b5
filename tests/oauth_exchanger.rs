mod support;

use chrono::TimeDelta;
use credential_relay::error::RelayError;
use credential_relay::types::{AccountIdentity, Provider, TokenGrant};
use serde_json::json;
use support::{FakeProvider, Harness};

fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
    let g = TokenGrant::new(access).with_expires_in(TimeDelta::seconds(3600));
    match refresh {
        Some(r) => g.with_refresh_token(r),
        None => g,
    }
}

#[tokio::test]
async fn exchange_stores_tokens_and_identity() {
    let fake = FakeProvider::new(Provider::Asana)
        .with_exchange(Ok(grant("A1", Some("R1"))))
        .with_identity(Ok(AccountIdentity {
            email: Some("dev@acme.io".into()),
            metadata: Some(json!({ "workspace_id": "42" })),
        }));
    let h = Harness::new(fake).await;

    let cred = h.exchanger.exchange(Provider::Asana, "code", "u1").await.unwrap();

    assert_eq!(cred.access_token.secret(), "A1");
    assert_eq!(cred.provider_account_email.as_deref(), Some("dev@acme.io"));
    assert_eq!(cred.provider_metadata, Some(json!({ "workspace_id": "42" })));
    assert_eq!(cred.token_expiry, Some(support::t0() + TimeDelta::seconds(3600)));
    let token = h.guard.get_valid_access_token("u1", Provider::Asana).await.unwrap();
    assert_eq!(token.secret(), "A1");
}

#[tokio::test]
async fn account_bound_to_another_user_is_rejected_without_writes() {
    let fake = FakeProvider::new(Provider::Zoom)
        .identity_required()
        .with_email("shared@acme.io")
        .with_exchange(Ok(grant("A1", Some("R1"))))
        .with_exchange(Ok(grant("B1", Some("S1"))));
    let h = Harness::new(fake).await;
    h.exchanger.exchange(Provider::Zoom, "c1", "u1").await.unwrap();
    let before = h.store.get("u1", Provider::Zoom).await.unwrap().unwrap();

    let err = h.exchanger.exchange(Provider::Zoom, "c2", "u2").await.unwrap_err();

    assert!(matches!(
        err,
        RelayError::AccountAlreadyBound { provider: Provider::Zoom, ref email } if email == "shared@acme.io"
    ));
    assert!(h.store.get("u2", Provider::Zoom).await.unwrap().is_none());
    let after = h.store.get("u1", Provider::Zoom).await.unwrap().unwrap();
    assert_eq!(after.access_token.secret(), before.access_token.secret());
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn reauthorization_keeps_refresh_token_when_omitted() {
    let fake = FakeProvider::new(Provider::Google)
        .identity_required()
        .with_email("me@gmail.com")
        .with_exchange(Ok(grant("A1", Some("R1"))))
        .with_exchange(Ok(grant("A9", None)));
    let h = Harness::new(fake).await;
    h.exchanger.exchange(Provider::Google, "c1", "u1").await.unwrap();
    h.clock.advance(TimeDelta::minutes(5));

    let cred = h.exchanger.exchange(Provider::Google, "c2", "u1").await.unwrap();

    assert_eq!(cred.access_token.secret(), "A9");
    assert_eq!(cred.refresh_token.unwrap().secret(), "R1");
    assert_eq!(h.store.list_for_user("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_exchange_writes_nothing() {
    let fake = FakeProvider::new(Provider::Monday).with_exchange(Err(RelayError::ExchangeFailed {
        provider: Provider::Monday,
        status: 400,
        body: r#"{"error":"invalid_grant"}"#.into(),
    }));
    let h = Harness::new(fake).await;

    let err = h.exchanger.exchange(Provider::Monday, "used", "u1").await.unwrap_err();

    assert!(matches!(err, RelayError::ExchangeFailed { status: 400, .. }));
    assert_eq!(h.fake.exchanges(), 1);
    assert!(h.store.get("u1", Provider::Monday).await.unwrap().is_none());
}

#[tokio::test]
async fn required_identity_failure_aborts_the_exchange() {
    let fake = FakeProvider::new(Provider::MicrosoftTeams)
        .identity_required()
        .with_exchange(Ok(grant("A1", Some("R1"))))
        .with_identity(Err(RelayError::ProviderError {
            provider: Provider::MicrosoftTeams,
            status: 403,
            body: "forbidden".into(),
        }));
    let h = Harness::new(fake).await;

    let err = h
        .exchanger
        .exchange(Provider::MicrosoftTeams, "code", "u1")
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::ProviderError { status: 403, .. }));
    assert!(h.store.get("u1", Provider::MicrosoftTeams).await.unwrap().is_none());
}

#[tokio::test]
async fn optional_identity_failure_still_connects() {
    let fake = FakeProvider::new(Provider::Clickup)
        .with_exchange(Ok(TokenGrant::new("A1")))
        .with_identity(Err(RelayError::ProviderUnreachable {
            provider: Provider::Clickup,
            reason: "timeout".into(),
        }));
    let h = Harness::new(fake).await;

    let cred = h.exchanger.exchange(Provider::Clickup, "code", "u1").await.unwrap();

    assert_eq!(cred.provider_account_email, None);
    assert_eq!(cred.token_expiry, None);
}

#[tokio::test]
async fn authorize_url_carries_user_as_state() {
    let h = Harness::new(FakeProvider::new(Provider::Zoom)).await;

    let url = h.exchanger.authorize_url(Provider::Zoom, "u-77").unwrap();
    assert!(url.query_pairs().any(|(k, v)| k == "state" && v == "u-77"));

    let err = h.exchanger.authorize_url(Provider::Google, "u-77").unwrap_err();
    assert!(matches!(err, RelayError::ProviderDisabled(Provider::Google)));
}
