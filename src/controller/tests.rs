use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::state::DisconnectReason;

#[test]
fn test_preset_index() {
    assert_eq!(Controller::preset_index(1, 1), 1);
    assert_eq!(Controller::preset_index(1, 6), 6);
    assert_eq!(Controller::preset_index(2, 1), 7);
    assert_eq!(Controller::preset_index(6, 6), 36);

    let id = PresetId::new(1, 3, 4).unwrap();
    assert_eq!(Controller::preset_index(id.bank(), id.preset()), id.index());
}

#[tokio::test]
async fn test_relay_maps_connection_events() {
    let bus = EventBus::current();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    bus.subscribe(
        Signal::Controller,
        Handler::immediate(move |event| s.lock().push(event.clone())),
    );

    relay(&bus, &RioEvent::Connected);
    relay(
        &bus,
        &RioEvent::Reconnecting {
            reason: "Connection reset".to_string(),
        },
    );
    relay(
        &bus,
        &RioEvent::Disconnected {
            reason: DisconnectReason::UserRequested,
        },
    );

    assert_eq!(
        *seen.lock(),
        vec![
            RioEvent::ControllerConnected,
            RioEvent::ControllerDisconnected
        ]
    );
}

#[tokio::test]
async fn test_failed_connect_drops_relay() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = RioConfig::builder("127.0.0.1")
        .port(port)
        .connection_timeout(Duration::from_secs(2))
        .auto_reconnect(false)
        .build();
    let controller = Controller::new(config, EventBus::current());

    assert!(controller.connect().await.is_err());
    assert!(!controller.is_connected());
    assert_eq!(controller.bus().subscriber_count(Signal::Connection), 0);
}

#[tokio::test]
async fn test_disconnect_when_never_connected() {
    let controller = Controller::new(RioConfig::builder("127.0.0.1").build(), EventBus::current());
    let mut events = controller.bus().listen();

    controller.disconnect().await;

    assert!(events.try_recv().is_err());
    assert!(!controller.is_reconnecting());
}
