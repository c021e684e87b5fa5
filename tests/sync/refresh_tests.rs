use std::time::Duration;

use aicap::test_support::{
    account_json, limits_json, BackendFixture, EngineHarness, RecordingNotifier, TEST_TOKEN,
};
use aicap_sync::{EngineCommand, Provider, RefreshOutcome, ToastKind, ViewState};
use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const WORK: &str = "a1a1a1a1";
const PERSONAL: &str = "a2a2a2a2";

fn two_accounts() -> Vec<serde_json::Value> {
    vec![
        account_json(WORK, "Work", true),
        account_json(PERSONAL, "Personal", false),
    ]
}

async fn mount_limits_times(fixture: &BackendFixture, primary: f64, times: u64) {
    Mock::given(method("GET"))
        .and(path("/api/v1/limits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "providers": { "openai": limits_json("openai", primary, 5.0) }
        })))
        .up_to_n_times(times)
        .mount(&fixture.server)
        .await;
}

#[tokio::test]
async fn fresh_refresh_renders_and_caches() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    fixture.mount_online(two_accounts(), 40.0).await;
    let mut h = EngineHarness::new(fixture)?;

    assert_eq!(h.engine.refresh().await, RefreshOutcome::Fresh);

    let Some(ViewState::Ready {
        provider,
        accounts,
        limits,
        stale,
        cached_at,
        ..
    }) = h.frontend.last_view()
    else {
        panic!("expected a ready view");
    };
    assert_eq!(provider, Provider::OpenAi);
    assert_eq!(accounts.len(), 2);
    assert_eq!(limits["openai"].primary_used_percent, Some(40.0));
    assert!(limits["openai"].primary_reset_at.is_some());
    assert!(!stale);
    assert!(cached_at.is_none());

    let snapshot = h.fixture.cached().expect("snapshot written");
    assert_eq!(snapshot.accounts.len(), 2);
    assert_eq!(snapshot.active_provider, Provider::OpenAi);

    let requests = h.fixture.server.received_requests().await.unwrap_or_default();
    let position = |p: &str| requests.iter().position(|r| r.url.path() == p);
    assert!(position("/api/v1/accounts").is_some());
    assert!(position("/api/v1/accounts") < position("/api/v1/limits"));
    for request in &requests {
        let token = request.headers.get("x-aicap-token").map(|v| v.as_bytes());
        assert_eq!(token, Some(TEST_TOKEN.as_bytes()), "{}", request.url);
    }
    Ok(())
}

#[tokio::test]
async fn crossing_notifies_once_per_crossing() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    fixture.mount_health(true).await;
    fixture.mount_accounts(Provider::OpenAi, two_accounts()).await;
    mount_limits_times(&fixture, 85.0, 2).await;
    mount_limits_times(&fixture, 50.0, 1).await;
    mount_limits_times(&fixture, 90.0, 1).await;
    let mut h = EngineHarness::new(fixture)?;

    for _ in 0..2 {
        h.engine.refresh().await;
    }
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.notifier.sent()[0].0, "Codex usage warning");
    assert!(h.notifier.sent()[0].1.contains("5h"));

    h.engine.refresh().await;
    h.engine.refresh().await;
    assert_eq!(h.notifier.sent().len(), 2);
    Ok(())
}

#[tokio::test]
async fn refused_permission_shows_toast() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    fixture.mount_online(two_accounts(), 92.0).await;
    let mut h = EngineHarness::with_notifier(fixture, RecordingNotifier::new(false, false))?;

    h.engine.refresh().await;

    assert!(h.notifier.sent().is_empty());
    let toasts = h.frontend.toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].kind, ToastKind::Warning);
    assert!(toasts[0].message.contains("92%"));
    Ok(())
}

#[tokio::test]
async fn manual_refresh_burst_forces_one_backend_refresh() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    fixture.mount_online(two_accounts(), 10.0).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/limits/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&fixture.server)
        .await;
    let mut h = EngineHarness::new(fixture)?;
    let (tx, rx) = mpsc::channel(8);

    let driver = async {
        // Clicks land after the startup refresh has finished.
        sleep(Duration::from_millis(200)).await;
        for _ in 0..3 {
            tx.send(EngineCommand::Refresh).await?;
        }
        sleep(Duration::from_millis(500)).await;
        tx.send(EngineCommand::Shutdown).await?;
        anyhow::Ok(())
    };
    let ((), sent) = tokio::join!(h.engine.run(rx), driver);
    sent?;

    assert_eq!(h.requests_to("GET", "/health").await, 2);
    Ok(())
}

#[tokio::test]
async fn refresh_request_during_refresh_is_not_queued() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    fixture.mount_health(true).await;
    fixture.mount_accounts(Provider::OpenAi, two_accounts()).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/limits"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "providers": { "openai": limits_json("openai", 10.0, 5.0) }
                }))
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&fixture.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/limits/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fixture.server)
        .await;
    let mut h = EngineHarness::new(fixture)?;
    let (tx, rx) = mpsc::channel(8);

    let driver = async {
        sleep(Duration::from_millis(150)).await;
        tx.send(EngineCommand::Refresh).await?;
        sleep(Duration::from_millis(1200)).await;
        tx.send(EngineCommand::Shutdown).await?;
        anyhow::Ok(())
    };
    let ((), sent) = tokio::join!(h.engine.run(rx), driver);
    sent?;

    assert_eq!(h.requests_to("GET", "/health").await, 1);
    assert_eq!(h.requests_to("GET", "/api/v1/limits").await, 1);
    assert!(matches!(h.frontend.last_view(), Some(ViewState::Ready { .. })));
    Ok(())
}

#[tokio::test]
async fn switching_provider_loads_its_accounts() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    fixture.mount_health(true).await;
    fixture
        .mount_limits(json!({
            "openai": limits_json("openai", 10.0, 5.0),
            "antigravity": limits_json("antigravity", 70.0, 20.0)
        }))
        .await;
    fixture.mount_accounts(Provider::OpenAi, two_accounts()).await;
    fixture.mount_accounts(Provider::Antigravity, vec![]).await;
    let mut h = EngineHarness::new(fixture)?;
    h.engine.refresh().await;

    h.engine
        .execute(EngineCommand::SwitchProvider(Provider::Antigravity))
        .await?;

    assert_eq!(h.engine.provider(), Provider::Antigravity);
    assert!(h.engine.accounts().is_empty());
    assert_eq!(
        h.fixture.cached().map(|s| s.active_provider),
        Some(Provider::Antigravity)
    );
    assert!(h
        .frontend
        .views()
        .iter()
        .any(|view| *view == ViewState::Loading));
    Ok(())
}
