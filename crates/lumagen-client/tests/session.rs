//! End-to-end tests against an in-process fake Lumagen.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{label_for, Behavior, MockDevice};
use lumagen_client::LumagenClient;
use lumagen_core::{CommandOutcome, CommandParams, ConnectionState, PowerState, StateDelta};
use tokio::sync::watch;

const CONNECT_WAIT: Duration = Duration::from_secs(3);

async fn connected_client(device: &MockDevice) -> LumagenClient {
    let client = LumagenClient::connect(device.config()).unwrap();
    client.wait_until_connected(CONNECT_WAIT).await.unwrap();
    client
}

/// Connected, with the power state and all input labels read.
async fn ready_client(device: &MockDevice) -> LumagenClient {
    let client = connected_client(device).await;
    let refreshed = eventually(CONNECT_WAIT, || {
        let state = client.current_state();
        state.power != PowerState::Unknown
            && state.input_labels.len() == 18
            && state.input_labels.iter().all(|l| !l.is_empty())
    })
    .await;
    assert!(refreshed, "connect refresh did not finish");
    client
}

fn record_deltas(client: &LumagenClient) -> Arc<Mutex<Vec<StateDelta>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.subscribe_state_changes(move |d| sink.lock().unwrap().push(d.clone()));
    seen
}

/// Polls `check` every 10 ms until it holds or `limit` passes.
async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) -> bool {
    tokio::time::timeout(CONNECT_WAIT, rx.wait_for(|s| *s == want))
        .await
        .is_ok_and(|r| r.is_ok())
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_power_on_acknowledged_on_echo_then_reports_warming_and_active() {
    // Arrange
    let device = MockDevice::start(Behavior {
        power_on_sequence: Some(Duration::from_millis(100)),
        ..Behavior::default()
    })
    .await;
    let client = ready_client(&device).await;
    assert_eq!(client.current_state().power, PowerState::Standby);
    let seen = record_deltas(&client);

    // Act
    let outcome = client.power_on().await;

    // Assert
    assert_eq!(outcome, CommandOutcome::Acknowledged("Z1".into()));
    assert!(eventually(CONNECT_WAIT, || client.current_state().power == PowerState::Active).await);
    let powers: Vec<_> = seen.lock().unwrap().iter().filter_map(StateDelta::power).collect();
    assert_eq!(powers, vec![PowerState::Warming, PowerState::Active]);
    client.disconnect().await;
}

#[tokio::test]
async fn test_power_state_is_read_after_connect() {
    // Arrange: nothing is pushed, so only the client's own query can tell
    let device = MockDevice::start(Behavior::default()).await;

    // Act
    let client = connected_client(&device).await;

    // Assert
    assert!(eventually(CONNECT_WAIT, || client.current_state().power == PowerState::Standby).await);
    assert_eq!(device.received().first().map(String::as_str), Some("ZQS02"));
    client.disconnect().await;
}

#[tokio::test]
async fn test_power_off_after_connect_sends_standby() {
    // Arrange
    let device = MockDevice::start(Behavior::default()).await;
    device.set_power(true);
    let client = ready_client(&device).await;

    // Act
    let outcome = client.power_off().await;

    // Assert
    assert_eq!(outcome, CommandOutcome::Acknowledged("Z0".into()));
    assert_eq!(device.commands(), vec!["Z0"]);
    client.disconnect().await;
}

#[tokio::test]
async fn test_power_query_returns_payload_and_updates_state() {
    let device = MockDevice::start(Behavior::default()).await;
    device.set_power(true);
    let client = ready_client(&device).await;

    let outcome = client.query_power().await;

    assert_eq!(outcome, CommandOutcome::Acknowledged("!S02,1".into()));
    assert_eq!(client.current_state().power, PowerState::Active);
    client.disconnect().await;
}

#[tokio::test]
async fn test_device_info_is_parsed_from_identity_response() {
    // Arrange
    let device = MockDevice::start(Behavior::default()).await;
    let client = ready_client(&device).await;

    // Act
    let info = client.device_info().await.unwrap();

    // Assert
    assert_eq!(info.model_name, "RadiancePro");
    assert_eq!(info.software_revision, "090524");
    assert_eq!(info.model_number, "1018");
    assert_eq!(info.serial_number, 9022);
    assert_eq!(info.id(), "1018009022");
    client.disconnect().await;
}

#[tokio::test]
async fn test_concurrent_commands_go_out_one_at_a_time_in_order() {
    // Arrange: slow echoes leave room for overlapping writes
    let device = MockDevice::start(Behavior {
        echo_delay: Duration::from_millis(40),
        ..Behavior::default()
    })
    .await;
    let client = Arc::new(ready_client(&device).await);

    // Act
    let mut tasks = Vec::new();
    for id in ["menu", "down", "ok"] {
        let c = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            c.send_command(id, &CommandParams::new()).await
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    // Assert
    assert!(outcomes.iter().all(CommandOutcome::is_acknowledged));
    assert_eq!(device.commands(), vec!["M", "v", "k"]);
    assert!(!device.saw_overlap());
    client.disconnect().await;
}

#[tokio::test]
async fn test_silent_device_times_out_at_echo_stage() {
    let device = MockDevice::start(Behavior {
        echo: false,
        ..Behavior::default()
    })
    .await;
    let client = connected_client(&device).await;

    let outcome = client.send_command("menu", &CommandParams::new()).await;

    assert_eq!(
        outcome,
        CommandOutcome::TimedOut(lumagen_core::TimeoutStage::Echo)
    );
    client.disconnect().await;
}

// ── Source labels ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_source_list_is_read_after_connect() {
    // Arrange / Act
    let device = MockDevice::start(Behavior::default()).await;
    let client = ready_client(&device).await;

    // Assert
    let labels = client.current_state().input_labels;
    assert_eq!(labels.len(), 18);
    assert_eq!(labels[0], label_for(1));
    assert_eq!(labels[17], label_for(18));
    assert!(device.received().contains(&"ZQS1AH".to_string()));
    client.disconnect().await;
}

#[tokio::test]
async fn test_select_source_by_label_sends_the_input() {
    // Arrange
    let device = MockDevice::start(Behavior::default()).await;
    let client = ready_client(&device).await;

    // Act
    let outcome = client.select_source("source 12").await;

    // Assert
    assert_eq!(outcome, CommandOutcome::Acknowledged("i12".into()));
    assert_eq!(device.commands(), vec!["i12"]);
    client.disconnect().await;
}

#[tokio::test]
async fn test_refresh_labels_returns_the_source_list() {
    let device = MockDevice::start(Behavior::default()).await;
    let mut config = device.config();
    config.connection.fetch_labels_on_connect = false;
    let client = LumagenClient::connect(config).unwrap();
    client.wait_until_connected(CONNECT_WAIT).await.unwrap();

    let labels = client.refresh_labels().await.unwrap();

    assert_eq!(labels.len(), 18);
    assert_eq!(labels[4], label_for(5));
    client.disconnect().await;
}

#[tokio::test]
async fn test_label_fetch_can_be_turned_off() {
    // Arrange
    let device = MockDevice::start(Behavior::default()).await;
    let mut config = device.config();
    config.connection.fetch_labels_on_connect = false;

    // Act
    let client = LumagenClient::connect(config).unwrap();
    client.wait_until_connected(CONNECT_WAIT).await.unwrap();

    // Assert
    assert!(eventually(CONNECT_WAIT, || client.current_state().power == PowerState::Standby).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(device.received(), vec!["ZQS02"]);
    assert!(client.current_state().input_labels.is_empty());
    client.disconnect().await;
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reports_in_one_read_publish_one_delta() {
    // Arrange
    let device = MockDevice::start(Behavior::default()).await;
    let client = ready_client(&device).await;
    assert_eq!(client.current_state().power, PowerState::Standby);
    let seen = record_deltas(&client);

    // Act: both reports in a single write
    device.push(b"Z1Warming\r\nZ1Active\r\n");

    // Assert
    assert!(eventually(CONNECT_WAIT, || client.current_state().power == PowerState::Active).await);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].power(), Some(PowerState::Active));
    drop(seen);
    client.disconnect().await;
}

#[tokio::test]
async fn test_malformed_report_leaves_state_untouched() {
    // Arrange
    let device = MockDevice::start(Behavior::default()).await;
    let client = ready_client(&device).await;
    device.push(b"!I00,3\r\n");
    assert!(eventually(CONNECT_WAIT, || client.current_state().active_source_id == Some(3)).await);

    // Act
    device.push(b"!I25,1,2\r\n");
    device.push(b"!I00,x\r\n");
    device.push(b"!I00,5\r\n");

    // Assert: the last, valid report still lands
    assert!(eventually(CONNECT_WAIT, || client.current_state().active_source_id == Some(5)).await);
    assert_eq!(client.current_state().power, PowerState::Standby);
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    client.disconnect().await;
}

// ── Connection lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_connection_loss_resolves_inflight_command_unavailable() {
    // Arrange: the device goes quiet after the connect refresh, and command
    // timeouts are long
    let device = MockDevice::start(Behavior::default()).await;
    device.set_power(true);
    let mut config = device.config();
    config.commands.echo_timeout_ms = 10_000;
    let client = Arc::new(LumagenClient::connect(config).unwrap());
    client.wait_until_connected(CONNECT_WAIT).await.unwrap();
    let refreshed = eventually(CONNECT_WAIT, || {
        let state = client.current_state();
        state.power == PowerState::Active && state.input_labels.len() == 18
    })
    .await;
    assert!(refreshed);
    device.set_silent(true);
    let mut link = client.watch_connection();

    let c = Arc::clone(&client);
    let inflight = tokio::spawn(async move { c.query_power().await });
    let sent = eventually(CONNECT_WAIT, || {
        device.received().last().map(String::as_str) == Some("ZQS02")
    })
    .await;
    assert!(sent);

    // Act
    device.drop_connection();

    // Assert
    let outcome = tokio::time::timeout(Duration::from_secs(2), inflight)
        .await
        .expect("resolved before the echo timeout")
        .unwrap();
    assert_eq!(outcome, CommandOutcome::ConnectionUnavailable);
    assert!(wait_for_state(&mut link, ConnectionState::Disconnected).await);
    assert!(eventually(CONNECT_WAIT, || client.current_state().power == PowerState::Unknown).await);
    client.disconnect().await;
}

#[tokio::test]
async fn test_reconnects_after_the_bridge_drops() {
    // Arrange
    let device = MockDevice::start(Behavior::default()).await;
    let client = connected_client(&device).await;
    let mut link = client.watch_connection();

    // Act
    device.drop_connection();

    // Assert
    assert!(wait_for_state(&mut link, ConnectionState::Disconnected).await);
    assert!(wait_for_state(&mut link, ConnectionState::Connected).await);
    assert_eq!(device.connections(), 2);
    assert!(client.query_power().await.is_acknowledged());
    client.disconnect().await;
}

#[tokio::test]
async fn test_unanswered_probes_degrade_then_drop_the_link() {
    // Arrange
    let device = MockDevice::start(Behavior {
        echo: false,
        answer_queries: false,
        ..Behavior::default()
    })
    .await;
    let mut config = device.config();
    config.connection.probe_interval_ms = 100;
    config.connection.degrade_after_misses = 1;
    config.connection.give_up_after_misses = 2;
    config.connection.backoff_initial_ms = 5_000;
    config.connection.backoff_max_ms = 5_000;
    config.commands.echo_timeout_ms = 50;
    config.commands.response_timeout_ms = 50;
    let client = LumagenClient::connect(config).unwrap();
    client.wait_until_connected(CONNECT_WAIT).await.unwrap();
    let mut link = client.watch_connection();

    // Act / Assert
    assert!(wait_for_state(&mut link, ConnectionState::Degraded).await);
    assert_eq!(
        client.send_command("menu", &CommandParams::new()).await,
        CommandOutcome::ConnectionUnavailable
    );
    assert!(wait_for_state(&mut link, ConnectionState::Disconnected).await);
    // Only the connect-time power query and the alive probes went out.
    assert!(device.received().iter().all(|c| c == "ZQS00" || c == "ZQS02"));
    assert!(device.commands().is_empty());
    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_stops_reconnecting() {
    let device = MockDevice::start(Behavior::default()).await;
    let client = connected_client(&device).await;

    client.disconnect().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(device.connections(), 1);
}
