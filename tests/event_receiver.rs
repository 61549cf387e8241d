// Event receiver against simulated panels on loopback
//
// Hooks are recorded instead of run, so each test can wait for the
// notifications it expects.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use isecnet_bridge::{rip, Hook, HookSink, Receiver, ReceiverConfig, ReceiverConfigBuilder};

const GENERIC_REPLY: [u8; 3] = [0x01, 0xFE, 0x00];
const WAIT: Duration = Duration::from_secs(3);

struct RecordingHooks {
    tx: mpsc::UnboundedSender<(Hook, String)>,
}

impl HookSink for RecordingHooks {
    fn invoke(&self, hook: Hook, argument: String) {
        let _ = self.tx.send((hook, argument));
    }
}

struct Harness {
    addr: String,
    hooks: mpsc::UnboundedReceiver<(Hook, String)>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Harness {
    async fn start(builder: ReceiverConfigBuilder) -> Self {
        let config: ReceiverConfig = builder.addr("127.0.0.1").port(0).build();
        let (tx, hooks) = mpsc::unbounded_channel();
        let receiver = Receiver::bind(config, Arc::new(RecordingHooks { tx }))
            .await
            .unwrap();
        let addr = receiver.local_addr().to_string();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(receiver.run(async move {
            let _ = stop_rx.await;
        }));
        Self {
            addr,
            hooks,
            stop: Some(stop),
            task,
        }
    }

    async fn panel(&self) -> TcpStream {
        TcpStream::connect(&self.addr).await.unwrap()
    }

    async fn next_hook(&mut self) -> (Hook, String) {
        timeout(WAIT, self.hooks.recv())
            .await
            .expect("no hook invoked")
            .expect("hook channel closed")
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        timeout(WAIT, self.task).await.unwrap().unwrap();
    }
}

fn default_builder() -> ReceiverConfigBuilder {
    ReceiverConfig::builder()
}

fn identification_frame() -> Vec<u8> {
    rip::encode_long(&[0x94, 0x11, 0x12, 0x34, 0xAB, 0xCD, 0xEF])
}

/// Contact 1234, type 18, qualifier 1 (open), code 130, partition 1, zone 5.
fn alarm_frame() -> Vec<u8> {
    rip::encode_long(&[
        0xB0, 0x11, 0x01, 0x02, 0x03, 0x04, 0x01, 0x08, 0x01, 0x01, 0x03, 0x0a, 0x0a, 0x01,
        0x0a, 0x0a, 0x05,
    ])
}

async fn read_exact(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("no reply")
        .unwrap();
    buf
}

/// Whether the receiver closed the connection within `WAIT`.
async fn closed_by_receiver(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(timeout(WAIT, stream.read(&mut buf)).await, Ok(Ok(0)) | Ok(Err(_)))
}

/// Whether nothing arrives for a short while.
async fn stays_silent(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    timeout(Duration::from_millis(300), stream.read(&mut buf))
        .await
        .is_err()
}

#[tokio::test]
async fn heartbeat_gets_generic_reply() {
    let harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;

    panel.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);

    panel.write_all(&[0xF7, 0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut panel, 6).await, [GENERIC_REPLY, GENERIC_REPLY].concat());

    harness.stop().await;
}

#[tokio::test]
async fn identified_panel_reports_alarm() {
    let mut harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;

    panel.write_all(&identification_frame()).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert_eq!(
        harness.next_hook().await,
        (Hook::Central, "connected 1234 ab:cd:ef".to_string())
    );

    panel.write_all(&alarm_frame()).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert_eq!(
        harness.next_hook().await,
        (Hook::Event, "130 1 5 1".to_string())
    );
    let (hook, message) = harness.next_hook().await;
    assert_eq!(hook, Hook::Message);
    assert!(message.ends_with(" Zone 5 triggered"), "{}", message);

    drop(panel);
    assert_eq!(
        harness.next_hook().await,
        (Hook::Central, "disconnected 1234 ab:cd:ef".to_string())
    );
    harness.stop().await;
}

#[tokio::test]
async fn bad_alarm_length_is_acked_and_session_survives() {
    let mut harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;

    let short = rip::encode_long(&[0xB0, 0x11, 0x01, 0x02, 0x03, 0x04, 0x01, 0x08, 0x01]);
    panel.write_all(&short).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert!(stays_silent(&mut panel).await);

    panel.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert!(harness.hooks.try_recv().is_err());

    harness.stop().await;
}

#[tokio::test]
async fn bad_contact_id_digit_is_acked_once() {
    let mut harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;

    // 0x0b in the event code is not a Contact-ID digit
    let frame = rip::encode_long(&[
        0xB0, 0x11, 0x01, 0x02, 0x03, 0x04, 0x01, 0x08, 0x01, 0x0b, 0x03, 0x0a, 0x0a, 0x01,
        0x0a, 0x0a, 0x05,
    ]);
    panel.write_all(&frame).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert!(stays_silent(&mut panel).await);
    assert!(harness.hooks.try_recv().is_err());

    panel.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);

    harness.stop().await;
}

#[tokio::test]
async fn panel_that_stops_reading_is_dropped() {
    let mut harness =
        Harness::start(default_builder().comm_timeout(Duration::from_millis(300))).await;

    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(4096).unwrap();
    let mut panel = socket.connect(harness.addr.parse().unwrap()).await.unwrap();
    panel.write_all(&identification_frame()).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert_eq!(
        harness.next_hook().await,
        (Hook::Central, "connected 1234 ab:cd:ef".to_string())
    );

    // heartbeats whose replies are never read
    let (_unread, mut write) = panel.into_split();
    let flood = tokio::spawn(async move {
        let _ = write.write_all(&vec![0xF7; 2 * 1024 * 1024]).await;
    });

    let hook = timeout(Duration::from_secs(20), harness.hooks.recv())
        .await
        .expect("stalled session was never closed")
        .expect("hook channel closed");
    assert_eq!(hook, (Hook::Central, "disconnected 1234 ab:cd:ef".to_string()));

    flood.abort();
    harness.stop().await;
}

#[tokio::test]
async fn frames_split_across_writes() {
    let mut harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;

    let frame = alarm_frame();
    let (head, tail) = frame.split_at(5);
    panel.write_all(head).await.unwrap();
    assert!(stays_silent(&mut panel).await);
    panel.write_all(tail).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert_eq!(harness.next_hook().await.0, Hook::Event);

    harness.stop().await;
}

#[tokio::test]
async fn datetime_request_gets_clock() {
    let harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;

    panel.write_all(&rip::encode_long(&[0x80])).await.unwrap();
    let reply = read_exact(&mut panel, 10).await;
    assert_eq!(reply[0], 0x08);
    assert_eq!(reply[1], 0x80);
    assert_eq!(rip::extract_frame(&reply).map(|(_, n)| n), Some(10));

    harness.stop().await;
}

#[tokio::test]
async fn invalid_checksum_is_consumed() {
    let harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;

    let mut frame = identification_frame();
    let last = frame.len() - 1;
    frame[last] ^= 0x55;
    panel.write_all(&frame).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);

    panel.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);

    harness.stop().await;
}

#[tokio::test]
async fn silent_panel_is_dropped_without_identification() {
    let harness =
        Harness::start(default_builder().ident_timeout(Duration::from_millis(200))).await;
    let mut panel = harness.panel().await;

    assert!(closed_by_receiver(&mut panel).await);
    harness.stop().await;
}

#[tokio::test]
async fn identified_panel_survives_identification_deadline() {
    let mut harness =
        Harness::start(default_builder().ident_timeout(Duration::from_millis(200))).await;
    let mut panel = harness.panel().await;

    panel.write_all(&identification_frame()).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert_eq!(harness.next_hook().await.0, Hook::Central);

    tokio::time::sleep(Duration::from_millis(400)).await;
    panel.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);

    harness.stop().await;
}

#[tokio::test]
async fn idle_session_is_closed() {
    let harness = Harness::start(default_builder().comm_timeout(Duration::from_millis(300))).await;
    let mut panel = harness.panel().await;

    panel.write_all(&identification_frame()).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);
    assert!(closed_by_receiver(&mut panel).await);

    harness.stop().await;
}

#[tokio::test]
async fn incomplete_frame_is_dropped() {
    let harness =
        Harness::start(default_builder().incomplete_timeout(Duration::from_millis(200))).await;
    let mut panel = harness.panel().await;

    panel.write_all(&[0x08, 0x94, 0x11]).await.unwrap();
    assert!(closed_by_receiver(&mut panel).await);

    harness.stop().await;
}

#[tokio::test]
async fn connections_over_limit_are_ignored() {
    let harness = Harness::start(default_builder().max_connections(1)).await;
    let mut first = harness.panel().await;
    first.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut first, 3).await, GENERIC_REPLY);

    let mut second = harness.panel().await;
    second.write_all(&[0xF7]).await.unwrap();
    assert!(stays_silent(&mut second).await);

    first.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut first, 3).await, GENERIC_REPLY);

    harness.stop().await;
}

#[tokio::test]
async fn unauthorized_panel_is_ignored() {
    let mut harness = Harness::start(default_builder().authorized_panel("00:00:01")).await;
    let mut panel = harness.panel().await;

    panel.write_all(&identification_frame()).await.unwrap();
    assert!(stays_silent(&mut panel).await);
    panel.write_all(&[0xF7]).await.unwrap();
    assert!(stays_silent(&mut panel).await);
    assert!(harness.hooks.try_recv().is_err());

    harness.stop().await;
}

#[tokio::test]
async fn service_timers_fire_hooks() {
    let mut harness = Harness::start(
        default_builder()
            .watchdog_interval(Duration::from_millis(150))
            .no_panel_alarm(Duration::from_millis(250)),
    )
    .await;

    let mut watchdog = 0;
    let mut no_panel = 0;
    while watchdog < 2 || no_panel < 1 {
        match harness.next_hook().await {
            (Hook::Watchdog, _) => watchdog += 1,
            (Hook::Central, argument) => {
                assert_eq!(argument, "no panel connected");
                no_panel += 1;
            }
            other => panic!("unexpected hook {:?}", other),
        }
    }

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let harness = Harness::start(default_builder()).await;
    let mut panel = harness.panel().await;
    panel.write_all(&[0xF7]).await.unwrap();
    assert_eq!(read_exact(&mut panel, 3).await, GENERIC_REPLY);

    harness.stop().await;
    assert!(closed_by_receiver(&mut panel).await);
}
