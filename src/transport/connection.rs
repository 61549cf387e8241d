// MIT License - Copyright (c) 2021 TJForc
// One live TCP session: receive task, send task, ordered event queue

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::codec::hex_dump;
use crate::constants::{RECV_BUFFER_SIZE, SEND_QUEUE_DEPTH};
use crate::error::{BridgeError, Result};
use crate::timeout::{Timeout, TimeoutRegistry};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything the owner of a connection gets to see, in posting order per side.
///
/// `K` names the owner's timers.
#[derive(Debug)]
pub enum Event<K> {
    Recv(Vec<u8>),
    /// A chunk was fully written; carries the remaining send queue depth
    Sent(usize),
    RecvEof,
    SendEof,
    Err(io::Error),
    Timeout(K),
}

impl<K> Event<K> {
    /// Whether the event ends the transport in at least one direction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::RecvEof | Event::SendEof | Event::Err(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

enum Outbound {
    Data(Vec<u8>),
    Shutdown,
}

type OnClosed = Box<dyn FnOnce(u64) + Send + Sync + 'static>;

pub struct Connection<K> {
    id: u64,
    peer: SocketAddr,
    state: ConnectionState,
    events: mpsc::UnboundedReceiver<Event<K>>,
    events_tx: mpsc::UnboundedSender<Event<K>>,
    outbound: Option<mpsc::Sender<Outbound>>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    timeouts: TimeoutRegistry,
    on_closed: Option<OnClosed>,
}

impl<K: Send + 'static> Connection<K> {
    /// Take over a connected socket and start its receive and send tasks.
    pub fn spawn(stream: TcpStream) -> Result<Self> {
        Self::with_owner(stream, None)
    }

    /// As [`Connection::spawn`], calling `on_closed` once after full teardown.
    pub(crate) fn with_owner(stream: TcpStream, on_closed: Option<OnClosed>) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (reader, writer) = stream.into_split();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (stop_tx, stop_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(receive_loop(
                id,
                reader,
                events_tx.clone(),
                stop_rx.clone(),
            )),
            tokio::spawn(send_loop(id, writer, outbound_rx, events_tx.clone(), stop_rx)),
        ];
        debug!("Connection {} open with {}", id, peer);

        Ok(Self {
            id,
            peer,
            state: ConnectionState::Open,
            events,
            events_tx,
            outbound: Some(outbound_tx),
            stop_tx,
            tasks,
            timeouts: TimeoutRegistry::new(),
            on_closed,
        })
    }
}

impl<K> Connection<K> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Next event, or `None` once the connection is closed.
    pub async fn next_event(&mut self) -> Option<Event<K>> {
        if self.state != ConnectionState::Open {
            return None;
        }
        self.events.recv().await
    }

    /// Queue `data` for sending, waiting for queue space.
    ///
    /// Silently ignored after [`Connection::close`]. Fails with
    /// `Disconnected` once the send direction has ended.
    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        let Some(outbound) = self.outbound.as_ref() else {
            debug!("Connection {}: send after close ignored", self.id);
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }
        debug!("Connection {} send: {}", self.id, hex_dump(&data));
        outbound
            .send(Outbound::Data(data))
            .await
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Half-close once everything queued before it is written.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Ok(());
        };
        outbound
            .send(Outbound::Shutdown)
            .await
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Close the socket, join both tasks, release owned timers and drop
    /// pending events. Nothing is delivered after this returns.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;
        let _ = self.stop_tx.send(true);
        self.outbound = None;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Connection {} task failed: {}", self.id, e);
            }
        }
        self.timeouts.release_all().await;

        self.events.close();
        let mut dropped = 0;
        while self.events.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Connection {} dropped {} pending events", self.id, dropped);
        }

        self.state = ConnectionState::Closed;
        debug!("Connection {} with {} closed", self.id, self.peer);
        if let Some(on_closed) = self.on_closed.take() {
            on_closed(self.id);
        }
    }
}

impl<K: Send + 'static> Connection<K> {
    /// Timer owned by this connection, posting `Event::Timeout(key)`.
    pub fn timeout(&self, duration: Duration, fudge: Duration, key: K) -> Timeout
    where
        K: Clone,
    {
        let events = self.events_tx.clone();
        self.timeouts.timeout_with(duration, fudge, move || {
            if events.send(Event::Timeout(key.clone())).is_err() {
                debug!("Timeout fired after its connection closed");
            }
        })
    }
}

impl<K> Drop for Connection<K> {
    fn drop(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        // Not closed by the owner: stop the tasks, timers end with the registry.
        warn!("Connection {} dropped without close", self.id);
        let _ = self.stop_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
        if let Some(on_closed) = self.on_closed.take() {
            on_closed(self.id);
        }
    }
}

async fn receive_loop<K>(
    id: u64,
    mut reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<Event<K>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = stop.changed() => {
                debug!("Connection {} receive task stopped", id);
                break;
            }
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("Connection {} receive EOF", id);
                    let _ = events.send(Event::RecvEof);
                    break;
                }
                Ok(n) => {
                    debug!("Connection {} recv: {}", id, hex_dump(&buf[..n]));
                    let _ = events.send(Event::Recv(buf[..n].to_vec()));
                }
                Err(e) => {
                    warn!("Connection {} receive error: {}", id, e);
                    let _ = events.send(Event::Err(e));
                    break;
                }
            }
        }
    }
}

fn is_send_eof(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero | io::ErrorKind::UnexpectedEof
    )
}

async fn send_loop<K>(
    id: u64,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Outbound>,
    events: mpsc::UnboundedSender<Event<K>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            _ = stop.changed() => break,
            item = queue.recv() => item,
        };
        let data = match item {
            None => break,
            Some(Outbound::Shutdown) => {
                debug!("Connection {} closing for writing", id);
                if let Err(e) = writer.shutdown().await {
                    debug!("Connection {} shutdown failed: {}", id, e);
                }
                break;
            }
            Some(Outbound::Data(data)) => data,
        };
        let result = tokio::select! {
            _ = stop.changed() => break,
            result = writer.write_all(&data) => result,
        };
        match result {
            Ok(()) => {
                let _ = events.send(Event::Sent(queue.len()));
            }
            Err(e) if is_send_eof(&e) => {
                debug!("Connection {} send EOF: {}", id, e);
                let _ = events.send(Event::SendEof);
                break;
            }
            Err(e) => {
                warn!("Connection {} send error: {}", id, e);
                let _ = events.send(Event::Err(e));
                break;
            }
        }
    }
}
