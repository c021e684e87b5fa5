use std::time::Duration;

use aicap::test_support::{account_json, limits_json, BackendFixture, EngineHarness};
use aicap_sync::{EngineCommand, SyncError, ToastKind, ViewState};
use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const WORK: &str = "a1a1a1a1";
const PERSONAL: &str = "a2a2a2a2";

fn two_accounts() -> Vec<serde_json::Value> {
    vec![
        account_json(WORK, "Work", true),
        account_json(PERSONAL, "Personal", false),
    ]
}

async fn ready_harness() -> Result<EngineHarness> {
    let fixture = BackendFixture::start().await?;
    fixture.mount_online(two_accounts(), 30.0).await;
    let mut h = EngineHarness::new(fixture)?;
    h.engine.refresh().await;
    Ok(h)
}

fn is_active_in_view(view: &ViewState, id: &str) -> bool {
    match view {
        ViewState::Ready { accounts, .. } => accounts.iter().any(|a| a.id == id && a.is_active),
        _ => false,
    }
}

#[tokio::test]
async fn switch_is_shown_before_backend_confirms() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/accounts/{PERSONAL}/activate")))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&h.fixture.server)
        .await;

    h.engine
        .execute(EngineCommand::SwitchAccount(PERSONAL.to_string()))
        .await?;

    let view = h.frontend.last_view().expect("rendered");
    assert!(is_active_in_view(&view, PERSONAL));
    assert!(!is_active_in_view(&view, WORK));

    sleep(Duration::from_millis(600)).await;
    assert_eq!(
        h.requests_to("POST", &format!("/api/v1/accounts/{PERSONAL}/activate"))
            .await,
        1
    );
    Ok(())
}

#[tokio::test]
async fn active_account_is_never_deleted() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.fixture.server)
        .await;

    let err = h
        .engine
        .execute(EngineCommand::RemoveAccount(WORK.to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ActiveAccountProtected(_)));
    assert!(h.frontend.prompts().is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_requires_confirmation() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v1/accounts/{PERSONAL}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "deleted"})))
        .expect(1)
        .mount(&h.fixture.server)
        .await;

    h.frontend.set_confirm_answer(false);
    h.engine
        .execute(EngineCommand::RemoveAccount(PERSONAL.to_string()))
        .await?;
    assert_eq!(h.engine.accounts().len(), 2);

    h.frontend.set_confirm_answer(true);
    h.engine
        .execute(EngineCommand::RemoveAccount(PERSONAL.to_string()))
        .await?;

    assert_eq!(h.frontend.prompts().len(), 2);
    assert!(h.frontend.prompts()[0].contains("Personal"));
    assert_eq!(h.engine.accounts().len(), 1);
    assert!(h
        .frontend
        .toasts()
        .iter()
        .any(|t| t.kind == ToastKind::Info));
    Ok(())
}

#[tokio::test]
async fn failed_delete_reloads_backend_list() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "locked"})))
        .mount(&h.fixture.server)
        .await;

    let err = h
        .engine
        .execute(EngineCommand::RemoveAccount(PERSONAL.to_string()))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("locked"));
    assert_eq!(h.engine.accounts().len(), 2);
    assert_eq!(h.requests_to("GET", "/api/v1/accounts").await, 2);
    Ok(())
}

#[tokio::test]
async fn failed_rename_reloads_backend_list() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("PUT"))
        .and(path(format!("/api/v1/accounts/{PERSONAL}/name")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "db locked"})))
        .expect(1)
        .mount(&h.fixture.server)
        .await;

    let err = h
        .engine
        .execute(EngineCommand::RenameAccount {
            account_id: PERSONAL.to_string(),
            name: "Side".to_string(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::OperationFailed { .. }));
    assert!(err.to_string().contains("db locked"));
    assert_eq!(h.requests_to("GET", "/api/v1/accounts").await, 2);
    assert!(h
        .engine
        .accounts()
        .iter()
        .any(|a| a.id == PERSONAL && a.name == "Personal"));
    Ok(())
}

#[tokio::test]
async fn only_one_account_stays_active() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    fixture
        .mount_online(
            vec![
                account_json(WORK, "Work", true),
                account_json(PERSONAL, "Personal", true),
            ],
            20.0,
        )
        .await;
    let mut h = EngineHarness::new(fixture)?;

    h.engine.refresh().await;

    let active: Vec<_> = h
        .engine
        .accounts()
        .iter()
        .filter(|a| a.is_active)
        .map(|a| a.id.clone())
        .collect();
    assert_eq!(active, [WORK]);
    Ok(())
}

#[tokio::test]
async fn invalid_names_are_rejected_locally() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.fixture.server)
        .await;

    for name in [String::new(), "n".repeat(51), "<script>".to_string()] {
        let err = h
            .engine
            .execute(EngineCommand::RenameAccount {
                account_id: PERSONAL.to_string(),
                name,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
    Ok(())
}

#[tokio::test]
async fn rename_sends_trimmed_name_and_reloads() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("PUT"))
        .and(path(format!("/api/v1/accounts/{PERSONAL}/name")))
        .and(query_param("name", "Личный 2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&h.fixture.server)
        .await;

    h.engine
        .execute(EngineCommand::BeginRename(PERSONAL.to_string()))
        .await?;
    h.engine
        .execute(EngineCommand::RenameAccount {
            account_id: PERSONAL.to_string(),
            name: "  Личный 2 ".to_string(),
        })
        .await?;

    assert_eq!(h.requests_to("GET", "/api/v1/accounts").await, 2);
    let Some(ViewState::Ready { editing, .. }) = h.frontend.last_view() else {
        panic!("expected ready view");
    };
    assert_eq!(editing, None);
    Ok(())
}

#[tokio::test]
async fn added_account_stops_polling_and_refreshes_once() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    // Startup refresh and the first poll see no accounts.
    fixture.mount_accounts_times(vec![], 2).await;
    fixture
        .mount_online(vec![account_json(WORK, "Work", true)], 10.0)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/openai/login"))
        .and(query_param("add_account", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "started"})))
        .expect(1)
        .mount(&fixture.server)
        .await;
    let mut h = EngineHarness::new(fixture)?;
    let (tx, rx) = mpsc::channel(8);

    let driver = async {
        tx.send(EngineCommand::AddAccount).await?;
        sleep(Duration::from_secs(1)).await;
        tx.send(EngineCommand::Shutdown).await?;
        anyhow::Ok(())
    };
    let ((), sent) = tokio::join!(h.engine.run(rx), driver);
    sent?;

    assert_eq!(h.requests_to("GET", "/health").await, 2);
    // startup, two polls, reconciling refresh
    assert_eq!(h.requests_to("GET", "/api/v1/accounts").await, 4);
    assert_eq!(h.engine.accounts().len(), 1);
    Ok(())
}

#[tokio::test]
async fn login_waits_for_authentication_then_refreshes() -> Result<()> {
    let fixture = BackendFixture::start().await?;
    let mut signed_out = limits_json("openai", 0.0, 0.0);
    signed_out["is_authenticated"] = json!(false);
    Mock::given(method("GET"))
        .and(path("/api/v1/limits"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "providers": { "openai": signed_out } })),
        )
        .up_to_n_times(2)
        .mount(&fixture.server)
        .await;
    fixture.mount_online(two_accounts(), 15.0).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/openai/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&fixture.server)
        .await;
    let mut h = EngineHarness::new(fixture)?;
    let (tx, rx) = mpsc::channel(8);

    let driver = async {
        tx.send(EngineCommand::Login).await?;
        sleep(Duration::from_secs(1)).await;
        tx.send(EngineCommand::Shutdown).await?;
        anyhow::Ok(())
    };
    let ((), sent) = tokio::join!(h.engine.run(rx), driver);
    sent?;

    assert_eq!(h.requests_to("GET", "/health").await, 2);
    let Some(ViewState::Ready { limits, .. }) = h.frontend.last_view() else {
        panic!("expected ready view");
    };
    assert!(limits["openai"].is_authenticated);
    Ok(())
}

#[tokio::test]
async fn logout_refreshes_immediately() -> Result<()> {
    let mut h = ready_harness().await?;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/openai/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.fixture.server)
        .await;

    h.engine.execute(EngineCommand::Logout).await?;

    assert_eq!(h.requests_to("GET", "/health").await, 2);
    Ok(())
}
