//! Integration tests driving the full client against a scripted in-process
//! TCP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use ridewire::protocol::{read_i32, FrameScanner, Message, MessageType};
use ridewire::{ClientBuilder, ClientError, ClientEvent, ErrorKind, StationState, TelemetryClient};

/// 76-byte telemetry payload with recognizable values (speed = 10.0).
fn telemetry_payload() -> Vec<u8> {
    let mut payload = Vec::with_capacity(76);
    for v in [1i32, 42, 0, 2, 33, 0, 0, 0] {
        payload.extend_from_slice(&v.to_be_bytes());
    }
    payload.extend_from_slice(&[0x41, 0x20, 0x00, 0x00]);
    for v in [0f32; 10] {
        payload.extend_from_slice(&v.to_be_bytes());
    }
    payload
}

/// Default request scripting: plausible replies for every request type.
fn scripted_reply(request: &Message) -> Vec<Message> {
    let id = request.request_id();
    match request.message_type() {
        MessageType::GetVersion => {
            vec![Message::new(MessageType::Version, id).with_bytes(&[2, 5, 7, 0])]
        }
        MessageType::GetTelemetry => {
            vec![Message::new(MessageType::Telemetry, id).with_bytes(&telemetry_payload())]
        }
        MessageType::GetCoasterCount => vec![Message::new(MessageType::IntValue, id).with_i32(3)],
        MessageType::GetCoasterName => {
            let index = read_i32(request.payload(), 0);
            let name = format!("Coaster {index}");
            vec![Message::new(MessageType::String, id).with_bytes(name.as_bytes())]
        }
        MessageType::GetCurrentCoasterAndNearestStation => {
            vec![Message::new(MessageType::IntValuePair, id).with_i32(2).with_i32(1)]
        }
        MessageType::GetStationState => {
            let flags = StationState::MANUAL_DISPATCH | StationState::CAN_DISPATCH;
            vec![Message::new(MessageType::StationState, id).with_u32(flags)]
        }
        _ => vec![Message::new(MessageType::Ok, id)],
    }
}

/// Spawn a one-connection server that answers with `reply`.
async fn spawn_server<F>(mut reply: F) -> SocketAddr
where
    F: FnMut(&Message) -> Vec<Message> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut scanner = FrameScanner::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(_) => return,
            };
            let Ok(messages) = scanner.push(&buf[..n]) else {
                return;
            };
            for message in messages {
                for response in reply(&message) {
                    if stream.write_all(&response.encode()).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    addr
}

async fn connect(addr: SocketAddr) -> TelemetryClient {
    ClientBuilder::new(addr.ip().to_string())
        .port(addr.port())
        .heartbeat(false)
        .connect()
        .await
        .unwrap()
}

/// Wait for the first event matching `pred`, with a deadline.
async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut pred: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_queries_decode_scripted_values() {
    let addr = spawn_server(scripted_reply).await;
    let client = connect(addr).await;

    let version = client.version().await.unwrap();
    assert_eq!(version.to_string(), "2.5.7.0");

    let count = client.coaster_count().await.unwrap();
    assert_eq!(count, 3);

    let name = client.coaster_name(2).await.unwrap();
    assert_eq!(name, "Coaster 2");

    let telemetry = client.telemetry().await.unwrap();
    assert_eq!(telemetry.speed, 10.0);
    assert_eq!(telemetry.frame, 42);
    assert!(telemetry.is_in_play_mode());

    let pair = client.current_coaster_and_nearest_station().await.unwrap();
    assert_eq!((pair.coaster, pair.station), (2, 1));

    let state = client.station_state(2, 1).await.unwrap();
    assert!(state.is_manual_dispatch());
    assert!(state.can_dispatch());
    assert!(!state.is_emergency_stop());

    client.shutdown().await;
}

#[tokio::test]
async fn test_commands_acknowledged_with_ok() {
    let addr = spawn_server(scripted_reply).await;
    let client = connect(addr).await;
    let mut events = client.subscribe();

    client.set_emergency_stop(true).await.unwrap();
    client.set_manual_mode(0, 0, true).await.unwrap();
    client.dispatch(0, 0).await.unwrap();
    client.set_gates(0, 0, false).await.unwrap();
    client.set_harness(0, 0, true).await.unwrap();
    client.set_platform(0, 0, true).await.unwrap();
    client.set_flyer_car(0, 0, false).await.unwrap();
    client.heartbeat().await.unwrap();

    wait_for_event(&mut events, |e| matches!(e, ClientEvent::OkReceived { .. })).await;
    assert!(client.last_error().is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_get_their_own_responses() {
    let addr = spawn_server(scripted_reply).await;
    let client = connect(addr).await;

    let (telemetry, state) = tokio::join!(client.telemetry(), client.station_state(0, 2));
    assert_eq!(telemetry.unwrap().speed, 10.0);
    assert!(state.unwrap().can_dispatch());

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_error_surfaces_as_server_kind() {
    let addr = spawn_server(|request| {
        let id = request.request_id();
        match request.message_type() {
            MessageType::Dispatch => vec![
                Message::new(MessageType::Error, id).with_bytes(b"station is not in manual mode"),
            ],
            _ => scripted_reply(request),
        }
    })
    .await;
    let client = connect(addr).await;
    let mut events = client.subscribe();

    let result = client.dispatch(0, 0).await;
    match result {
        Err(ClientError::Server(message)) => {
            assert_eq!(message, "station is not in manual mode")
        }
        other => panic!("expected server error, got {other:?}"),
    }

    let last = client.last_error().unwrap();
    assert_eq!(last.kind, ErrorKind::Server);
    assert!(last.message.contains("not in manual mode"));

    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Error(_))).await;

    client.shutdown().await;
}

#[tokio::test]
async fn test_unexpected_response_type() {
    let addr = spawn_server(|request| {
        let id = request.request_id();
        match request.message_type() {
            // Wrong type: IntValue instead of Telemetry.
            MessageType::GetTelemetry => vec![Message::new(MessageType::IntValue, id).with_i32(1)],
            _ => scripted_reply(request),
        }
    })
    .await;
    let client = connect(addr).await;

    let result = client.telemetry().await;
    assert!(matches!(
        result,
        Err(ClientError::UnexpectedResponse {
            expected: MessageType::Telemetry,
            actual: MessageType::IntValue,
        })
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn test_request_timeout_when_server_stays_silent() {
    let addr = spawn_server(|request| match request.message_type() {
        MessageType::GetTelemetry => vec![],
        _ => scripted_reply(request),
    })
    .await;
    let client = ClientBuilder::new(addr.ip().to_string())
        .port(addr.port())
        .heartbeat(false)
        .request_timeout(Duration::from_millis(100))
        .connect()
        .await
        .unwrap();

    let result = client.telemetry().await;
    assert!(matches!(result, Err(ClientError::Timeout)));
    assert_eq!(client.last_error().unwrap().kind, ErrorKind::Client);

    // The connection stays usable after a timeout.
    assert!(client.is_connected());
    assert_eq!(client.coaster_count().await.unwrap(), 3);

    client.shutdown().await;
}

#[tokio::test]
async fn test_unsolicited_response_reported_not_fatal() {
    let addr = spawn_server(|request| {
        let id = request.request_id();
        match request.message_type() {
            MessageType::Idle => vec![
                Message::new(MessageType::Ok, id),
                // Response for a request nobody made.
                Message::new(MessageType::Ok, 0xDEAD),
            ],
            _ => scripted_reply(request),
        }
    })
    .await;
    let client = connect(addr).await;
    let mut events = client.subscribe();

    client.heartbeat().await.unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::Error(_))).await;
    match event {
        ClientEvent::Error(record) => {
            assert_eq!(record.request_id, Some(0xDEAD));
            assert_eq!(record.kind, ErrorKind::Client);
        }
        _ => unreachable!(),
    }

    // Still connected and serving requests.
    assert!(client.is_connected());
    assert_eq!(client.coaster_count().await.unwrap(), 3);

    client.shutdown().await;
}

#[tokio::test]
async fn test_command_after_shutdown_is_not_connected() {
    let addr = spawn_server(scripted_reply).await;
    let client = connect(addr).await;

    client.shutdown().await;
    assert!(!client.is_connected());

    let result = client.set_gates(0, 0, true).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_shutdown_unblocks_pending_request() {
    let addr = spawn_server(|request| match request.message_type() {
        MessageType::GetTelemetry => vec![],
        _ => scripted_reply(request),
    })
    .await;
    // Default 30 s request timeout: the wait must be cut short by shutdown.
    let client = Arc::new(connect(addr).await);

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.telemetry().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("pending request must not outlive shutdown")
        .unwrap();
    assert!(matches!(
        result,
        Err(ClientError::ConnectionClosed) | Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn test_telemetry_polling_publishes_events() {
    let addr = spawn_server(scripted_reply).await;
    let client = connect(addr).await;
    let mut events = client.subscribe();

    client.start_telemetry(Duration::from_millis(30));
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::TelemetryReceived { .. })
    })
    .await;
    match event {
        ClientEvent::TelemetryReceived { telemetry, .. } => assert_eq!(telemetry.speed, 10.0),
        _ => unreachable!(),
    }

    client.stop_telemetry();
    client.shutdown().await;
}

#[tokio::test]
async fn test_station_state_poll_follows_nearest() {
    let addr = spawn_server(scripted_reply).await;
    let client = ClientBuilder::new(addr.ip().to_string())
        .port(addr.port())
        .heartbeat(false)
        .station_state_follows_nearest(true)
        .connect()
        .await
        .unwrap();
    let mut events = client.subscribe();

    // Configured pair is (0, 0); the server reports nearest (2, 1).
    client.start_nearest_station(Duration::from_millis(30));
    client.start_station_state(Duration::from_millis(30), 0, 0);

    let event = wait_for_event(&mut events, |e| {
        matches!(
            e,
            ClientEvent::StationStateReceived {
                coaster: 2,
                station: 1,
                ..
            }
        )
    })
    .await;
    match event {
        ClientEvent::StationStateReceived { state, .. } => assert!(state.can_dispatch()),
        _ => unreachable!(),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn test_nearest_poll_emits_changed_event_with_context() {
    let addr = spawn_server(scripted_reply).await;
    let client = connect(addr).await;
    let mut events = client.subscribe();

    client.start_nearest_station(Duration::from_millis(30));

    let event = wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::CurrentCoasterOrStationChanged { .. })
    })
    .await;
    match event {
        ClientEvent::CurrentCoasterOrStationChanged {
            pair,
            coaster_name,
            telemetry,
        } => {
            assert_eq!((pair.coaster, pair.station), (2, 1));
            assert_eq!(coaster_name.as_deref(), Some("Coaster 2"));
            assert_eq!(telemetry.unwrap().speed, 10.0);
        }
        _ => unreachable!(),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn test_automatic_heartbeat() {
    let addr = spawn_server(scripted_reply).await;
    let client = ClientBuilder::new(addr.ip().to_string())
        .port(addr.port())
        .heartbeat_interval(Duration::from_millis(30))
        .connect()
        .await
        .unwrap();
    let mut events = client.subscribe();

    wait_for_event(&mut events, |e| matches!(e, ClientEvent::OkReceived { .. })).await;

    client.shutdown().await;
}

#[tokio::test]
async fn test_garbage_before_frames_is_tolerated() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut scanner = FrameScanner::new();
            let mut buf = vec![0u8; 4096];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(_) => return,
                };
                let Ok(messages) = scanner.push(&buf[..n]) else {
                    return;
                };
                for message in messages {
                    // Noise ahead of every reply.
                    if stream.write_all(&[0x00, 0x7F, 0x20]).await.is_err() {
                        return;
                    }
                    for response in scripted_reply(&message) {
                        if stream.write_all(&response.encode()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        addr
    };
    let client = connect(addr).await;

    assert_eq!(client.coaster_count().await.unwrap(), 3);
    assert_eq!(client.coaster_name(0).await.unwrap(), "Coaster 0");

    client.shutdown().await;
}

#[tokio::test]
async fn test_registry_owns_and_shuts_down_clients() {
    use ridewire::ClientRegistry;

    let addr = spawn_server(scripted_reply).await;
    let registry = ClientRegistry::new();
    registry.insert("conn-1", connect(addr).await);
    assert_eq!(registry.len(), 1);

    let client = registry.get("conn-1").unwrap();
    assert_eq!(client.coaster_count().await.unwrap(), 3);

    assert!(registry.remove("conn-1").await);
    assert!(!client.is_connected());
    assert!(registry.is_empty());
    assert!(!registry.remove("conn-1").await);
}
