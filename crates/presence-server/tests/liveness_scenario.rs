//! Timer-driven session scenarios over an in-memory pipe.
//!
//! The tokio clock is paused, so a 15 s liveness window costs no wall time.
//! The "device" side is built from the same presence-core transport the real
//! client uses, but is driven by hand so each test controls exactly when it
//! answers.

use std::sync::Arc;
use std::time::Duration;

use presence_core::{
    spawn_writer, ClientInfo, HeartbeatInitiator, Message, MessageReader, Outbox, SessionConfig,
    SessionError, UnknownTypePolicy, WriterHandle,
};
use presence_server::infrastructure::network::serve_connection;
use presence_server::{RegistryEvent, ServerError, SessionRegistry};
use tokio::io::{duplex, split, DuplexStream, ReadHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

type DeviceReader = MessageReader<ReadHalf<DuplexStream>>;

struct Device {
    input: DeviceReader,
    output: Outbox,
    _writer: WriterHandle,
    _stop: watch::Sender<bool>,
}

impl Device {
    async fn recv(&mut self) -> Option<Message> {
        self.input.next_message().await.expect("device read failed")
    }

    async fn send(&self, msg: Message) {
        self.output.send(msg).await.expect("device send failed");
    }
}

fn sensor(id: &str) -> ClientInfo {
    ClientInfo::new(id, "sensor1", "temp")
}

/// Starts `serve_connection` on one end of a pipe and returns the other end.
fn start(
    config: SessionConfig,
    registry: &SessionRegistry,
) -> (Device, JoinHandle<Result<(), ServerError>>) {
    start_with_pipe(config, registry, 8 * 1024)
}

fn start_with_pipe(
    config: SessionConfig,
    registry: &SessionRegistry,
    pipe_capacity: usize,
) -> (Device, JoinHandle<Result<(), ServerError>>) {
    let (server_io, device_io) = duplex(pipe_capacity);
    let (srv_rd, srv_wr) = split(server_io);
    let (dev_rd, dev_wr) = split(device_io);
    let (output, writer) = spawn_writer(dev_wr);
    let (stop_tx, stop_rx) = watch::channel(false);

    let task = tokio::spawn(serve_connection(
        srv_rd,
        srv_wr,
        None,
        Arc::new(config),
        registry.clone(),
        stop_rx,
    ));

    (
        Device {
            input: MessageReader::new(dev_rd),
            output,
            _writer: writer,
            _stop: stop_tx,
        },
        task,
    )
}

async fn register(device: &mut Device, info: ClientInfo) {
    assert_eq!(device.recv().await, Some(Message::HelloRequest));
    device.send(Message::HelloResponse(info)).await;
    assert_eq!(device.recv().await, Some(Message::Approve));
}

#[tokio::test(start_paused = true)]
async fn test_register_ping_pong_then_silence_closes_and_leaves_registry() {
    // Arrange
    let registry = SessionRegistry::default();
    let mut events = registry.subscribe();
    let id = "ab".repeat(32);
    let (mut device, server) = start(SessionConfig::default(), &registry);

    // Act: register and answer three pings.
    register(&mut device, sensor(&id)).await;
    assert!(matches!(events.recv().await, Ok(RegistryEvent::Registered { .. })));
    assert_eq!(registry.ids().await, vec![id.clone()]);

    let activated = Instant::now();
    let mut last_pong = activated;
    for n in 1..=3u32 {
        assert_eq!(device.recv().await, Some(Message::Ping));
        let at = Instant::now() - activated;
        let due = Duration::from_secs(5) * n;
        assert!(at >= due && at < due + Duration::from_millis(10), "ping {n} at {at:?}");
        device.send(Message::Pong).await;
        last_pong = Instant::now();
    }

    // Go silent: keep reading pings but never answer.
    let mut pings_ignored = 0;
    let report = loop {
        match device.recv().await {
            Some(Message::Ping) => pings_ignored += 1,
            other => break other,
        }
    };

    // Assert
    let closed_after = Instant::now() - last_pong;
    assert!(closed_after >= Duration::from_secs(15), "closed early: {closed_after:?}");
    assert!(closed_after < Duration::from_secs(16), "closed late: {closed_after:?}");
    assert!(pings_ignored >= 2);
    assert!(matches!(report, Some(Message::Error(text)) if text.contains("liveness")));
    assert_eq!(device.recv().await, None);

    let result = server.await.unwrap();
    assert!(matches!(
        result,
        Err(ServerError::Session(SessionError::LivenessTimeout(w))) if w == Duration::from_secs(15)
    ));
    assert!(registry.find_session(&id).await.is_none());
    assert!(matches!(events.recv().await, Ok(RegistryEvent::Removed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_pong_at_exact_deadline_keeps_session_alive() {
    // Arrange: pings are far apart so only the device's pongs matter.
    let registry = SessionRegistry::default();
    let id = "cd".repeat(32);
    let config = SessionConfig {
        ping_interval: Duration::from_secs(600),
        ..SessionConfig::default()
    };
    let (mut device, server) = start(config, &registry);
    register(&mut device, sensor(&id)).await;

    // Act: unsolicited pongs, each landing exactly as the window closes.
    tokio::time::sleep(Duration::from_secs(15)).await;
    device.send(Message::Pong).await;
    tokio::time::sleep(Duration::from_secs(15)).await;
    device.send(Message::Pong).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Assert
    assert!(!server.is_finished());
    let handle = registry.find_session(&id).await.expect("still registered");
    assert!(!handle.state().is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_client_initiated_heartbeat_is_answered_with_pong() {
    let registry = SessionRegistry::default();
    let config = SessionConfig {
        heartbeat_initiator: HeartbeatInitiator::Client,
        ..SessionConfig::default()
    };
    let (mut device, _server) = start(config, &registry);
    register(&mut device, sensor("client-pinger")).await;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        device.send(Message::Ping).await;
        assert_eq!(device.recv().await, Some(Message::Pong));
    }

    assert!(registry.find_session("client-pinger").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_error_message_is_logged_and_session_stays_open() {
    let registry = SessionRegistry::default();
    let (mut device, _server) = start(SessionConfig::default(), &registry);
    register(&mut device, sensor("chatty")).await;

    device.send(Message::Error("sensor overheated".into())).await;

    assert_eq!(device.recv().await, Some(Message::Ping));
    assert!(registry.find_session("chatty").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unhandled_type_skipped_by_default_but_fatal_when_fail_closed() {
    // LogAndSkip: a stray Approve is ignored.
    let registry = SessionRegistry::default();
    let (mut lenient, _server) = start(SessionConfig::default(), &registry);
    register(&mut lenient, sensor("lenient")).await;
    lenient.send(Message::Approve).await;
    assert_eq!(lenient.recv().await, Some(Message::Ping));

    // FailClosed: the same message ends the session with an error report.
    let config = SessionConfig {
        unknown_type_policy: UnknownTypePolicy::FailClosed,
        ..SessionConfig::default()
    };
    let (mut strict, server) = start(config, &registry);
    register(&mut strict, sensor("strict")).await;
    strict.send(Message::Approve).await;

    assert!(matches!(strict.recv().await, Some(Message::Error(_))));
    assert!(matches!(
        server.await.unwrap(),
        Err(ServerError::Session(SessionError::UnknownMessageType(4)))
    ));
    assert!(registry.find_session("strict").await.is_none());
    assert!(registry.find_session("lenient").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_frame_closes_session_without_panic() {
    use tokio::io::AsyncWriteExt;

    let registry = SessionRegistry::default();
    let (server_io, device_io) = duplex(8 * 1024);
    let (srv_rd, srv_wr) = split(server_io);
    let (dev_rd, mut dev_wr) = split(device_io);
    let (_stop, stop_rx) = watch::channel(false);
    let server = tokio::spawn(serve_connection(
        srv_rd,
        srv_wr,
        None,
        Arc::new(SessionConfig::default()),
        registry.clone(),
        stop_rx,
    ));
    let mut input = MessageReader::new(dev_rd);

    assert_eq!(input.next_message().await.unwrap(), Some(Message::HelloRequest));
    let registration = presence_core::encode_message(&Message::HelloResponse(sensor("bad"))).unwrap();
    dev_wr.write_all(&registration).await.unwrap();
    assert_eq!(input.next_message().await.unwrap(), Some(Message::Approve));

    // Version byte 7 is not a protocol this server speaks.
    dev_wr.write_all(&[7, 5, 0, 0, 0, 0, 0, 0]).await.unwrap();

    assert!(matches!(input.next_message().await.unwrap(), Some(Message::Error(_))));
    assert!(matches!(
        server.await.unwrap(),
        Err(ServerError::Session(SessionError::Decode(_)))
    ));
    assert!(registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_reaches_session_whose_peer_stops_reading() {
    // Arrange: the device pings nonstop but never reads the pongs, so the
    // small pipe back to it fills and the server's replies back up.
    let registry = SessionRegistry::default();
    let id = "ef".repeat(32);
    let config = SessionConfig {
        heartbeat_initiator: HeartbeatInitiator::Client,
        ..SessionConfig::default()
    };
    let (mut device, server) = start_with_pipe(config, &registry, 64);
    register(&mut device, sensor(&id)).await;

    let flood = device.output.clone();
    tokio::spawn(async move {
        for _ in 0..1000 {
            if flood.send(Message::Ping).await.is_err() {
                break;
            }
        }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Act
    registry.find_session(&id).await.expect("registered").shutdown();

    // Assert
    let result = timeout(Duration::from_secs(3), server)
        .await
        .expect("shutdown must not wait on the blocked reply")
        .unwrap();
    assert!(result.is_ok());
    assert!(registry.find_session(&id).await.is_none());
}
