use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use russound_rio::testing::MockController;
use russound_rio::{
    Connection, ConnectionState, DisconnectReason, EventBus, EventFilter, RioConfig, RioError,
    RioEvent, Signal, SourceId, ZoneId,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn config_for(controller: &MockController) -> RioConfig {
    let addr = controller.address().expect("controller started");
    RioConfig::builder(addr.ip().to_string())
        .port(addr.port())
        .connection_timeout(Duration::from_secs(2))
        .reconnect_delay(Duration::from_millis(50))
        .command_timeout(Some(Duration::from_secs(5)))
        .build()
}

async fn start_controller() -> MockController {
    init_tracing();
    let mut controller = MockController::default_controller();
    controller.start().await.expect("mock controller binds");
    controller
}

async fn next_event(events: &mut EventFilter) -> RioEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event within timeout")
        .expect("bus alive")
}

async fn recv(rx: &mut UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("update within timeout")
        .expect("callback alive")
}

/// Refused port: bind an ephemeral port, then release it
async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_get_and_set_round_trip() {
    let controller = start_controller().await;
    let zone = ZoneId::new(1, 1).unwrap();
    controller.set_variable(zone, "name", "Kitchen").await;

    let connection = Connection::new(EventBus::current());
    connection.connect(config_for(&controller)).await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);

    let name = connection.get_zone_variable(zone, "name").await.unwrap();
    assert_eq!(name, "Kitchen");
    // The reply fed the cache
    assert_eq!(connection.get_cached_zone_variable(zone, "Name", "?"), "Kitchen");

    connection.set_zone_variable(zone, "volume", "30").await.unwrap();
    assert_eq!(
        controller.received_commands().await,
        vec!["GET C[1].Z[1].name", "SET C[1].Z[1].volume=\"30\""]
    );

    // Cache hit, nothing new on the wire
    connection.get_zone_variable(zone, "name").await.unwrap();
    assert_eq!(controller.received_commands().await.len(), 2);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_back_to_back_commands_resolve_in_order() {
    let controller = start_controller().await;
    for zone in 1..=4 {
        let id = ZoneId::new(1, zone).unwrap();
        controller
            .set_variable(id, "volume", &(zone * 10).to_string())
            .await;
    }

    let connection = Connection::new(EventBus::current());
    connection.connect(config_for(&controller)).await.unwrap();

    let requests = (1..=4).map(|zone| {
        let connection = connection.clone();
        async move {
            let id = ZoneId::new(1, zone).unwrap();
            connection.send_command(format!("GET {}.volume", id.device_str())).await
        }
    });
    let replies = futures::future::join_all(requests).await;

    let values: Vec<String> = replies.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec!["10", "20", "30", "40"]);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_error_outcome_is_command_error() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    connection.connect(config_for(&controller)).await.unwrap();

    let err = connection
        .get_zone_variable(ZoneId::new(1, 9).unwrap(), "name")
        .await
        .unwrap_err();
    assert!(matches!(err, RioError::Command { ref message } if message == "Invalid command"));

    // The connection survives a command error
    assert!(connection.is_connected());
    assert!(connection.send_command("GET C[1].Z[1].nothing").await.is_err());
    assert!(connection.is_connected());

    connection.disconnect().await;
}

#[tokio::test]
async fn test_controller_level_value() {
    let controller = start_controller().await;
    controller
        .set_variable(russound_rio::Target::Controller(1), "type", "MCA-C5")
        .await;

    let connection = Connection::new(EventBus::current());
    connection.connect(config_for(&controller)).await.unwrap();

    assert_eq!(connection.send_command("GET C[1].type").await.unwrap(), "MCA-C5");

    connection.disconnect().await;
}

#[tokio::test]
async fn test_pushed_updates_reach_callbacks() {
    let controller = start_controller().await;
    let zone = ZoneId::new(1, 2).unwrap();
    let source = SourceId::new(3).unwrap();
    controller.set_variable(zone, "name", "Patio").await;

    let connection = Connection::new(EventBus::current());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let zone_tx = tx.clone();
    connection.add_zone_callback(move |id: ZoneId, name: &str, value: &str| {
        let _ = zone_tx.send(format!("{}.{name}={value}", id.device_str()));
    });
    connection.add_source_callback(move |id: SourceId, name: &str, value: &str| {
        let _ = tx.send(format!("{}.{name}={value}", id.device_str()));
    });

    connection.connect(config_for(&controller)).await.unwrap();
    connection.watch_zone(zone).await.unwrap();
    connection.watch_source(source).await.unwrap();
    assert_eq!(connection.watched_zones(), vec![zone]);
    assert_eq!(connection.watched_sources(), vec![source]);

    // The watch reported the current state
    assert_eq!(recv(&mut rx).await, "C[1].Z[2].name=Patio");

    controller.push_update(zone, "volume", "17").await;
    assert_eq!(recv(&mut rx).await, "C[1].Z[2].volume=17");

    controller.push_update(source, "songName", "So What").await;
    assert_eq!(recv(&mut rx).await, "S[3].songname=So What");

    assert_eq!(connection.get_cached_zone_variable(zone, "volume", ""), "17");
    assert_eq!(
        connection.get_cached_source_variable(source, "SONGNAME", ""),
        "So What"
    );

    connection.unwatch_zone(zone).await.unwrap();
    assert!(connection.watched_zones().is_empty());
    assert_eq!(controller.watched().await, vec!["S[3]"]);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_zone_event_is_sent() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    connection.connect(config_for(&controller)).await.unwrap();

    let zone = ZoneId::new(1, 3).unwrap();
    connection
        .send_zone_event(zone, "KeyPress", ["Volume", "25"])
        .await
        .unwrap();
    connection
        .send_zone_event(zone, "AllOff", Vec::<String>::new())
        .await
        .unwrap();

    assert_eq!(
        controller.events().await,
        vec!["C[1].Z[3]!KeyPress Volume 25", "C[1].Z[3]!AllOff"]
    );

    connection.disconnect().await;
}

#[tokio::test]
async fn test_connect_twice_is_a_no_op() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    let mut events = EventFilter::signal(connection.bus(), Signal::Connection);

    connection.connect(config_for(&controller)).await.unwrap();
    connection.connect(config_for(&controller)).await.unwrap();

    assert_eq!(next_event(&mut events).await, RioEvent::Connected);
    assert_eq!(controller.accepted_connections(), 1);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    let mut events = connection.bus().listen();

    connection.connect(config_for(&controller)).await.unwrap();
    connection.disconnect().await;
    connection.disconnect().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(events.try_recv().unwrap().1, RioEvent::Connected);
    assert_eq!(
        events.try_recv().unwrap().1,
        RioEvent::Disconnected {
            reason: DisconnectReason::UserRequested
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_commands_fail_fast_when_disconnected() {
    init_tracing();
    let connection = Connection::new(EventBus::current());

    let err = connection.send_command("GET C[1].type").await.unwrap_err();
    assert!(matches!(err, RioError::NotConnected));

    let err = connection
        .watch_zone(ZoneId::new(1, 1).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RioError::NotConnected));
    assert!(connection.watched_zones().is_empty());
}

#[tokio::test]
async fn test_connect_failure_without_auto_reconnect() {
    init_tracing();
    let port = closed_port().await;
    let connection = Connection::new(EventBus::current());
    let mut events = connection.bus().listen();

    let config = RioConfig::builder("127.0.0.1")
        .port(port)
        .connection_timeout(Duration::from_secs(2))
        .auto_reconnect(false)
        .build();
    let err = connection.connect(config).await.unwrap_err();

    assert!(matches!(
        err,
        RioError::ConnectionFailed { .. } | RioError::ConnectionTimeout { .. }
    ));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(connection.stats().last_error.is_some());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_failure_enters_reconnecting() {
    init_tracing();
    let port = closed_port().await;
    let connection = Connection::new(EventBus::current());
    let mut events = EventFilter::signal(connection.bus(), Signal::Connection);

    let config = RioConfig::builder("127.0.0.1")
        .port(port)
        .connection_timeout(Duration::from_secs(2))
        .reconnect_delay(Duration::from_millis(50))
        .command_timeout(Some(Duration::from_millis(100)))
        .build();
    connection.connect(config).await.unwrap();

    assert!(connection.is_reconnecting());
    assert!(matches!(
        next_event(&mut events).await,
        RioEvent::Reconnecting { .. }
    ));

    // Queued while reconnecting, bounded by the command timeout
    let err = connection.send_command("GET C[1].type").await.unwrap_err();
    assert!(matches!(err, RioError::CommandTimeout { .. }));

    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(
        next_event(&mut events).await,
        RioEvent::Disconnected {
            reason: DisconnectReason::UserRequested
        }
    );
}

#[tokio::test]
async fn test_reconnects_and_rewatches_after_drop() {
    let controller = start_controller().await;
    let zone = ZoneId::new(1, 1).unwrap();
    let connection = Connection::new(EventBus::current());
    let mut events = EventFilter::signal(connection.bus(), Signal::Connection);
    let mut state = connection.state_watch();

    connection.connect(config_for(&controller)).await.unwrap();
    connection.watch_zone(zone).await.unwrap();
    assert_eq!(next_event(&mut events).await, RioEvent::Connected);

    controller.drop_clients();

    match next_event(&mut events).await {
        RioEvent::Reconnecting { reason } => assert!(!reason.is_empty()),
        other => panic!("expected Reconnecting, got {other:?}"),
    }
    assert_eq!(next_event(&mut events).await, RioEvent::Connected);
    timeout(Duration::from_secs(5), state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    // The watch is re-sent on the new socket
    timeout(Duration::from_secs(5), async {
        loop {
            let count = controller
                .received_commands()
                .await
                .iter()
                .filter(|c| *c == "WATCH C[1].Z[1] ON")
                .count();
            if count == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("watch re-sent");

    assert_eq!(controller.accepted_connections(), 2);
    assert!(connection.stats().reconnect_attempts >= 1);

    // Pushes on the new socket still reach the cache
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    connection.add_zone_callback(move |_: ZoneId, name: &str, value: &str| {
        let _ = tx.send((name.to_string(), value.to_string()));
    });
    controller.push_update(zone, "volume", "5").await;
    let (name, value) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((name.as_str(), value.as_str()), ("volume", "5"));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_drop_without_auto_reconnect_disconnects() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    let mut events = EventFilter::signal(connection.bus(), Signal::Connection);

    let config = RioConfig {
        auto_reconnect: false,
        ..config_for(&controller)
    };
    connection.connect(config).await.unwrap();
    connection.send_command("WATCH C[1].Z[1] ON").await.unwrap();
    assert_eq!(next_event(&mut events).await, RioEvent::Connected);

    controller.drop_clients();

    assert!(matches!(
        next_event(&mut events).await,
        RioEvent::Disconnected {
            reason: DisconnectReason::Transport(_)
        }
    ));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(matches!(
        connection.send_command("GET C[1].type").await,
        Err(RioError::NotConnected)
    ));
}

#[tokio::test]
async fn test_disconnect_fails_pending_commands() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    let config = RioConfig {
        command_timeout: None,
        ..config_for(&controller)
    };
    connection.connect(config).await.unwrap();
    controller.set_unresponsive(true).await;

    let first = tokio::spawn({
        let connection = connection.clone();
        async move { connection.send_command("GET C[1].Z[1].name").await }
    });
    // Wait until the first command is on the wire
    timeout(Duration::from_secs(5), async {
        while controller.received_commands().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let second = tokio::spawn({
        let connection = connection.clone();
        async move { connection.send_command("GET C[1].Z[2].name").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    connection.disconnect().await;

    let first = timeout(Duration::from_secs(5), first).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(5), second).await.unwrap().unwrap();
    assert!(matches!(first, Err(RioError::ConnectionClosed)));
    assert!(matches!(second, Err(RioError::ConnectionClosed)));
}

#[tokio::test]
async fn test_command_timeout() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    let config = RioConfig {
        command_timeout: Some(Duration::from_millis(200)),
        ..config_for(&controller)
    };
    connection.connect(config).await.unwrap();
    controller.set_unresponsive(true).await;

    let err = connection.send_command("GET C[1].type").await.unwrap_err();
    assert!(matches!(
        err,
        RioError::CommandTimeout { duration } if duration == Duration::from_millis(200)
    ));
    assert!(err.is_recoverable());

    connection.disconnect().await;
}

#[tokio::test]
async fn test_stats_track_traffic() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    connection.connect(config_for(&controller)).await.unwrap();

    connection.send_command("WATCH S[1] ON").await.unwrap();
    let _ = connection.send_command("GET S[1].name").await;

    let stats = connection.stats();
    assert_eq!(stats.commands_sent, 2);
    assert_eq!(stats.lines_received, 2);
    assert!(stats.uptime().is_some());

    connection.disconnect().await;
    assert!(connection.stats().uptime().is_none());
}

#[tokio::test]
async fn test_scheduled_handler_sees_lifecycle() {
    let controller = start_controller().await;
    let bus = EventBus::current();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let s = Arc::clone(&seen);
    let _subscription = bus.subscribe(
        Signal::Connection,
        russound_rio::Handler::scheduled(move |event| {
            let s = Arc::clone(&s);
            let done = done_tx.clone();
            async move {
                s.lock().push(event);
                let _ = done.send(());
            }
        }),
    );

    let connection = Connection::new(bus);
    connection.connect(config_for(&controller)).await.unwrap();
    connection.disconnect().await;

    for _ in 0..2 {
        timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
    let seen = seen.lock();
    assert!(seen.contains(&RioEvent::Connected));
    assert!(seen.contains(&RioEvent::Disconnected {
        reason: DisconnectReason::UserRequested
    }));
}

#[tokio::test]
async fn test_unanswered_command_triggers_reconnect() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    let mut events = EventFilter::signal(connection.bus(), Signal::Connection);
    let config = RioConfig {
        command_timeout: Some(Duration::from_millis(300)),
        ..config_for(&controller)
    };
    connection.connect(config).await.unwrap();
    assert_eq!(next_event(&mut events).await, RioEvent::Connected);
    controller.set_variable(russound_rio::Target::Controller(1), "type", "MCA-66").await;

    controller.set_unresponsive(true).await;
    let err = connection.send_command("GET C[1].type").await.unwrap_err();
    assert!(matches!(err, RioError::CommandTimeout { .. }));
    controller.set_unresponsive(false).await;

    // The silent socket is abandoned for a fresh one
    match next_event(&mut events).await {
        RioEvent::Reconnecting { reason } => assert_eq!(reason, "Command timed out"),
        other => panic!("expected Reconnecting, got {other:?}"),
    }
    assert_eq!(next_event(&mut events).await, RioEvent::Connected);

    for _ in 0..3 {
        assert_eq!(connection.send_command("GET C[1].type").await.unwrap(), "MCA-66");
    }
    assert_eq!(controller.accepted_connections(), 2);
    assert_eq!(controller.received_commands().await.len(), 4);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_connect_disconnect_cycles() {
    let controller = start_controller().await;
    let zone = ZoneId::new(1, 1).unwrap();
    controller.set_variable(zone, "name", "Kitchen").await;
    let connection = Connection::new(EventBus::current());

    for cycle in 1..=3 {
        connection.connect(config_for(&controller)).await.unwrap();
        assert!(connection.is_connected());
        assert_eq!(
            connection.send(&russound_rio::Command::get(zone, "name")).await.unwrap(),
            "Kitchen"
        );
        connection.disconnect().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(controller.accepted_connections(), cycle);
    }

    assert!(matches!(
        connection.send_command("GET C[1].Z[1].name").await,
        Err(RioError::NotConnected)
    ));
}

#[tokio::test]
async fn test_connect_after_disconnect_while_reconnecting() {
    let controller = start_controller().await;
    let connection = Connection::new(EventBus::current());
    let mut events = EventFilter::signal(connection.bus(), Signal::Connection);

    let unreachable = RioConfig::builder("127.0.0.1")
        .port(closed_port().await)
        .connection_timeout(Duration::from_secs(2))
        .reconnect_delay(Duration::from_millis(50))
        .build();
    connection.connect(unreachable).await.unwrap();
    assert!(connection.is_reconnecting());
    assert!(matches!(
        next_event(&mut events).await,
        RioEvent::Reconnecting { .. }
    ));

    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(
        next_event(&mut events).await,
        RioEvent::Disconnected {
            reason: DisconnectReason::UserRequested
        }
    );

    connection.connect(config_for(&controller)).await.unwrap();
    assert_eq!(next_event(&mut events).await, RioEvent::Connected);
    assert!(connection.send_command("WATCH S[1] ON").await.is_ok());
    assert_eq!(controller.accepted_connections(), 1);

    // The stopped retry loop does not come back
    assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());
    assert!(connection.is_connected());

    connection.disconnect().await;
}
