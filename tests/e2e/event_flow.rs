//! Event channel scenarios: state reconstruction, heartbeats, reconnects

use std::sync::Arc;

use seestar::device::DeviceCommand;
use seestar::{ConnectionEvent, ConnectionState, Error, StateSnapshot, Telescope};
use serde_json::json;

use super::mock_device::MockSeestar;
use crate::WAIT;

async fn wait_snapshot(
    telescope: &Telescope,
    pred: impl Fn(&StateSnapshot) -> bool,
) -> Arc<StateSnapshot> {
    let mut rx = telescope.snapshot_receiver();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("snapshot condition not reached")
        .expect("connection task gone");
    Arc::clone(&snapshot)
}

async fn wait_state(telescope: &Telescope, pred: impl Fn(&ConnectionState) -> bool) {
    let mut rx = telescope.state_receiver();
    tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("connection state not reached")
        .expect("connection task gone");
}

async fn next_event(telescope: &mut Telescope) -> ConnectionEvent {
    tokio::time::timeout(WAIT, telescope.events().event_receiver().recv())
        .await
        .expect("no connection event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_goto_sequence_reports_stages() {
    let device = MockSeestar::start().await;
    let mut telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut link = device.accept_events().await;

    link.send_events(&[
        r#"{"Event": "View", "Timestamp": "718.1", "state": "working", "mode": "star", "target_name": "M 81", "route": []}"#,
        r#"{"Event": "AutoGoto", "Timestamp": "718.3", "state": "working", "route": ["View"]}"#,
        r#"{"Event": "ScopeGoto", "Timestamp": "719.0", "state": "working", "route": ["View", "AutoGoto"]}"#,
    ])
    .await;

    let snapshot = wait_snapshot(&telescope, |s| s.events_applied == 3).await;
    let view = snapshot.get(&["View"]).unwrap();
    assert_eq!(view.stage.as_deref(), Some("AutoGoto"));
    assert_eq!(view.field("target_name"), Some(&json!("M 81")));
    assert_eq!(
        snapshot.get(&["View", "AutoGoto"]).unwrap().stage.as_deref(),
        Some("ScopeGoto")
    );
    assert!(snapshot.root.stage.is_none());

    // Completion keeps the stage and merges the new fields
    link.send_event(
        r#"{"Event": "ScopeGoto", "state": "complete", "dist_deg": 0.0024, "route": ["View", "AutoGoto"]}"#,
    )
    .await;
    let snapshot = wait_snapshot(&telescope, |s| s.events_applied == 4).await;
    let goto = snapshot.get(&["View", "AutoGoto", "ScopeGoto"]).unwrap();
    assert_eq!(goto.state(), Some("complete"));
    assert_eq!(goto.field("dist_deg"), Some(&json!(0.0024)));
    assert_eq!(
        snapshot.get(&["View", "AutoGoto"]).unwrap().stage.as_deref(),
        Some("ScopeGoto")
    );

    telescope.close().await;
}

#[tokio::test]
async fn test_replies_and_noise_do_not_reach_the_tree() {
    let device = MockSeestar::start().await;
    let mut telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut link = device.accept_events().await;

    link.send_events(&[
        r#"{"jsonrpc": "2.0", "Timestamp": "9507.2", "method": "scope_get_equ_coord", "result": {"ra": 1.0, "dec": 2.0}, "code": 0, "id": 1}"#,
        "not json at all",
        r#"{"Event": "View", "route": "not a list"}"#,
        "",
        r#"{"Event": "PiStatus", "battery_capacity": 77}"#,
    ])
    .await;

    let snapshot = wait_snapshot(&telescope, |s| s.events_applied > 0).await;
    assert_eq!(snapshot.events_applied, 1);
    assert!(snapshot.get(&["View"]).is_none());
    assert_eq!(snapshot.latest["PiStatus"]["battery_capacity"], json!(77));

    telescope.close().await;
}

#[tokio::test]
async fn test_drop_yields_empty_tree_then_rebuilds() {
    let device = MockSeestar::start().await;
    let mut telescope = Telescope::connect(device.settings()).await.unwrap();

    let mut first = device.accept_events().await;
    first
        .send_events(&[
            r#"{"Event": "View", "state": "working", "route": []}"#,
            r#"{"Event": "Stack", "state": "start", "route": ["View"]}"#,
        ])
        .await;
    wait_snapshot(&telescope, |s| s.events_applied == 2).await;
    drop(first);

    let mut second = device.accept_events().await;
    wait_state(&telescope, ConnectionState::is_connected).await;
    assert!(telescope.snapshot().is_empty());

    second
        .send_event(r#"{"Event": "Stack", "state": "frame_complete", "stacked_frame": 3, "route": ["View"]}"#)
        .await;
    let snapshot = wait_snapshot(&telescope, |s| s.events_applied == 1).await;
    // Nothing from the first session survives
    assert!(snapshot.get(&["View"]).unwrap().fields.is_empty());
    assert_eq!(snapshot.get(&["View"]).unwrap().stage.as_deref(), Some("Stack"));
    assert_eq!(snapshot.recent.len(), 1);

    assert_eq!(next_event(&mut telescope).await, ConnectionEvent::Connected);
    assert!(matches!(
        next_event(&mut telescope).await,
        ConnectionEvent::Disconnected { .. }
    ));
    assert_eq!(
        next_event(&mut telescope).await,
        ConnectionEvent::Reconnecting {
            attempt: 1,
            max_attempts: 3
        }
    );
    assert_eq!(next_event(&mut telescope).await, ConnectionEvent::Connected);

    telescope.close().await;
}

#[tokio::test]
async fn test_heartbeat_uses_configured_method() {
    let device = MockSeestar::start().await;
    let mut settings = device.settings();
    settings.events.heartbeat_interval_secs = 1;
    settings.events.heartbeat_method = "pi_is_verified".to_string();

    let mut telescope = Telescope::connect(settings).await.unwrap();
    let mut link = device.accept_events().await;

    let first = link.recv_method("pi_is_verified").await;
    let second = link.recv_method("pi_is_verified").await;
    assert!(first["id"].as_u64().unwrap() < second["id"].as_u64().unwrap());

    telescope.close().await;
}

#[tokio::test]
async fn test_silent_device_triggers_reconnect() {
    let device = MockSeestar::start().await;
    let mut settings = device.settings();
    settings.events.heartbeat_interval_secs = 1;
    settings.events.heartbeat_timeout_factor = 2;

    let mut telescope = Telescope::connect(settings).await.unwrap();
    let _silent = device.accept_events().await;

    assert_eq!(next_event(&mut telescope).await, ConnectionEvent::Connected);
    match next_event(&mut telescope).await {
        ConnectionEvent::Disconnected { reason } => {
            assert!(reason.contains("No traffic"), "{reason}")
        }
        other => panic!("expected disconnect, got {other:?}"),
    }

    let _second = device.accept_events().await;
    wait_state(&telescope, ConnectionState::is_connected).await;

    telescope.close().await;
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let mut device = MockSeestar::start().await;
    let mut telescope = Telescope::connect(device.settings()).await.unwrap();

    let link = device.accept_events().await;
    device.power_off_events();
    drop(link);

    wait_state(&telescope, ConnectionState::is_terminal).await;
    assert_eq!(
        telescope.connection_state(),
        ConnectionState::Failed { attempts: 3 }
    );
    assert!(telescope.snapshot().is_empty());

    let mut events = Vec::new();
    while let Ok(event) = telescope.events().event_receiver().try_recv() {
        events.push(event);
    }
    assert_eq!(events.last(), Some(&ConnectionEvent::Failed { attempts: 3 }));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::Reconnecting { .. }))
            .count(),
        3
    );

    let err = telescope
        .send_command(DeviceCommand::new("get_device_state"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_commands_reach_device() {
    let device = MockSeestar::start().await;
    let mut telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut link = device.accept_events().await;

    telescope
        .send_command(
            DeviceCommand::new("get_device_state").with_params(json!({"keys": ["device"]})),
        )
        .await
        .unwrap();

    let request = link.recv_method("get_device_state").await;
    assert_eq!(request["params"]["keys"], json!(["device"]));
    assert!(request["id"].is_u64());

    telescope.close().await;
}

#[tokio::test]
async fn test_close_releases_socket() {
    let device = MockSeestar::start().await;
    let mut telescope = Telescope::connect(device.settings()).await.unwrap();
    let mut link = device.accept_events().await;

    telescope.close().await;
    link.expect_closed().await;
    assert_eq!(telescope.connection_state(), ConnectionState::Closed);
    assert!(telescope
        .send_command(DeviceCommand::new("scope_get_equ_coord"))
        .await
        .is_err());
}
