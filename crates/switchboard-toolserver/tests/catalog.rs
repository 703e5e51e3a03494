//! Lifecycle and routing tests against real tool server subprocesses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use switchboard_core::{ServerId, SwitchboardError, ToolOutcome};
use switchboard_mcp::{CatalogTimeouts, LaunchSpec, LifecycleState, ToolCatalog};
use switchboard_metrics::TimingRecorder;

const SERVER_BIN: &str = env!("CARGO_BIN_EXE_switchboard-toolserver");

fn launch(toolset: &str, extra: &[&str]) -> LaunchSpec {
    LaunchSpec {
        command: SERVER_BIN.to_string(),
        args: std::iter::once(toolset)
            .chain(extra.iter().copied())
            .map(String::from)
            .collect(),
        env: HashMap::new(),
        disabled: false,
    }
}

fn catalog() -> Arc<ToolCatalog> {
    Arc::new(ToolCatalog::new(
        CatalogTimeouts::default(),
        Arc::new(TimingRecorder::new()),
    ))
}

#[tokio::test]
async fn server_reaches_ready_and_resolves_its_tools() {
    let catalog = catalog();
    let id = catalog
        .register("calc", launch("calculator", &[]))
        .await
        .unwrap();

    let status = catalog.status().await;
    assert_eq!(status.get(&id), Some(&LifecycleState::Ready));

    assert_eq!(catalog.resolve("add").await.unwrap(), id);
    assert_eq!(catalog.resolve("sqrt").await.unwrap(), id);
    assert!(matches!(
        catalog.resolve("cosine").await,
        Err(SwitchboardError::UnknownTool(_))
    ));

    let tools = catalog.list_all().await;
    assert_eq!(tools.len(), 8);
    assert!(tools.iter().all(|t| t.server == id));

    catalog.shutdown_all().await;
}

#[tokio::test]
async fn invoke_round_trips_successes_and_in_band_errors() {
    let catalog = catalog();
    let id = catalog
        .register("calc", launch("calculator", &[]))
        .await
        .unwrap();

    let outcome = catalog
        .invoke(&id, "add", json!({"a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ToolOutcome::Success {
            content: "2 + 3 = 5".into()
        }
    );

    let outcome = catalog
        .invoke(&id, "divide", json!({"a": 1, "b": 0}))
        .await
        .unwrap();
    assert!(outcome.is_error());
    assert!(outcome.text().contains("zero"));

    // An in-band failure leaves the server fully routable.
    let status = catalog.status().await;
    assert_eq!(status.get(&id), Some(&LifecycleState::Ready));

    catalog.shutdown_all().await;
}

#[tokio::test]
async fn echo_server_round_trips() {
    let catalog = catalog();
    let id = catalog.register("local", launch("echo", &[])).await.unwrap();

    let outcome = catalog
        .invoke(&id, "echo", json!({"message": "hi there"}))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ToolOutcome::Success {
            content: "Echo: hi there".into()
        }
    );

    catalog.shutdown_all().await;
}

#[tokio::test]
async fn rejected_initialize_leaves_the_server_degraded() {
    let catalog = catalog();
    let err = catalog
        .register("calc", launch("calculator", &["--reject-initialize"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchboardError::Startup { .. }));

    let status = catalog.status().await;
    assert_eq!(
        status.get(&ServerId::from("calc")),
        Some(&LifecycleState::Degraded)
    );
    assert!(matches!(
        catalog.resolve("add").await,
        Err(SwitchboardError::UnknownTool(_))
    ));
}

#[tokio::test]
async fn mute_server_fails_the_handshake_by_timeout() {
    let timeouts = CatalogTimeouts {
        handshake: Duration::from_millis(300),
        ..CatalogTimeouts::default()
    };
    let catalog = Arc::new(ToolCatalog::new(timeouts, Arc::new(TimingRecorder::new())));

    let err = catalog
        .register("calc", launch("calculator", &["--mute"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchboardError::Startup { .. }));

    let status = catalog.status().await;
    assert_eq!(
        status.get(&ServerId::from("calc")),
        Some(&LifecycleState::Degraded)
    );
}

#[tokio::test]
async fn first_server_to_reach_ready_keeps_a_disputed_tool_name() {
    let catalog = catalog();
    let first = catalog
        .register("calc-a", launch("calculator", &[]))
        .await
        .unwrap();
    let second = catalog
        .register("calc-b", launch("calculator", &[]))
        .await
        .unwrap();

    let status = catalog.status().await;
    assert_eq!(status.get(&first), Some(&LifecycleState::Ready));
    assert_eq!(status.get(&second), Some(&LifecycleState::Ready));

    // Every disputed name routes to the earlier epoch; nothing is listed
    // twice.
    assert_eq!(catalog.resolve("add").await.unwrap(), first);
    let tools = catalog.list_all().await;
    assert_eq!(tools.len(), 8);
    assert!(tools.iter().all(|t| t.server == first));

    catalog.shutdown_all().await;
}

#[tokio::test]
async fn exit_mid_session_becomes_unavailable_then_unknown() {
    let catalog = catalog();
    let id = catalog
        .register("calc", launch("calculator", &["--exit-after-calls", "1"]))
        .await
        .unwrap();

    let outcome = catalog
        .invoke(&id, "abs", json!({"value": -7}))
        .await
        .unwrap();
    assert_eq!(outcome.text(), "|-7| = 7");

    // The server answered its last permitted call and exited.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = catalog
        .invoke(&id, "abs", json!({"value": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchboardError::ProcessUnavailable(_)));

    let status = catalog.status().await;
    assert_eq!(status.get(&id), Some(&LifecycleState::Terminated));
    assert!(matches!(
        catalog.resolve("abs").await,
        Err(SwitchboardError::UnknownTool(_))
    ));
}

#[tokio::test]
async fn refresh_is_idempotent() {
    let catalog = catalog();
    let id = catalog
        .register("calc", launch("calculator", &[]))
        .await
        .unwrap();

    catalog.refresh(&id).await.unwrap();
    catalog.refresh(&id).await.unwrap();

    assert_eq!(catalog.list_all().await.len(), 8);
    assert_eq!(catalog.resolve("add").await.unwrap(), id);

    catalog.shutdown_all().await;
}

#[tokio::test]
async fn restart_brings_a_server_back() {
    let catalog = catalog();
    let id = catalog
        .register("calc", launch("calculator", &["--exit-after-calls", "1"]))
        .await
        .unwrap();

    catalog.invoke(&id, "abs", json!({"value": -1})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = catalog.invoke(&id, "abs", json!({"value": 1})).await;

    assert_eq!(
        catalog.status().await.get(&id),
        Some(&LifecycleState::Terminated)
    );

    catalog.restart(&id).await.unwrap();
    assert_eq!(
        catalog.status().await.get(&id),
        Some(&LifecycleState::Ready)
    );
    let outcome = catalog
        .invoke(&id, "abs", json!({"value": -2}))
        .await
        .unwrap();
    assert_eq!(outcome.text(), "|-2| = 2");

    catalog.shutdown_all().await;
}

#[tokio::test]
async fn shutdown_all_terminates_every_server() {
    let catalog = catalog();
    let calc = catalog
        .register("calc", launch("calculator", &[]))
        .await
        .unwrap();
    let local = catalog.register("local", launch("echo", &[])).await.unwrap();

    catalog.shutdown_all().await;

    let status = catalog.status().await;
    assert_eq!(status.get(&calc), Some(&LifecycleState::Terminated));
    assert_eq!(status.get(&local), Some(&LifecycleState::Terminated));
    assert!(matches!(
        catalog.resolve("add").await,
        Err(SwitchboardError::UnknownTool(_))
    ));
    assert!(matches!(
        catalog.invoke(&calc, "add", json!({})).await,
        Err(SwitchboardError::ProcessUnavailable(_))
    ));
}
