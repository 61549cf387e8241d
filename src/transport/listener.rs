// MIT License - Copyright (c) 2021 TJForc
// Inbound accept loop

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::timeout::{Timeout, TimeoutRegistry};
use crate::transport::connection::Connection;

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Events of a listener. `L` names the listener's own timers, `S` those of its sessions.
pub enum ListenerEvent<L, S> {
    New(Connection<S>),
    Timeout(L),
}

/// Live sessions by connection id. Entries leave after full teardown.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<u64, SocketAddr>>>,
}

impl SessionTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, SocketAddr>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }
}

pub struct Listener<L, S> {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<ListenerEvent<L, S>>,
    events_tx: mpsc::UnboundedSender<ListenerEvent<L, S>>,
    stop_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    timeouts: TimeoutRegistry,
    sessions: SessionTable,
    closed: bool,
}

impl<L: Send + 'static, S: Send + 'static> Listener<L, S> {
    /// Bind `addr` and start accepting.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Cannot listen on {}: {}", addr, e);
            e
        })?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);

        let (events_tx, events) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let sessions = SessionTable::default();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            events_tx.clone(),
            sessions.clone(),
            stop_rx,
        ));

        Ok(Self {
            local_addr,
            events,
            events_tx,
            stop_tx,
            accept_task: Some(accept_task),
            timeouts: TimeoutRegistry::new(),
            sessions,
            closed: false,
        })
    }

    /// Timer shared by all sessions, posting `ListenerEvent::Timeout(key)`.
    pub fn timeout(&self, duration: Duration, fudge: Duration, key: L) -> Timeout
    where
        L: Clone,
    {
        let events = self.events_tx.clone();
        self.timeouts.timeout_with(duration, fudge, move || {
            if events.send(ListenerEvent::Timeout(key.clone())).is_err() {
                debug!("Listener timeout fired after close");
            }
        })
    }
}

impl<L, S> Listener<L, S> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> SessionTable {
        self.sessions.clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Next event, or `None` once closed.
    pub async fn next_event(&mut self) -> Option<ListenerEvent<L, S>> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// Stop accepting, release timers and close sessions nobody picked up.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("Accept task failed: {}", e);
            }
        }
        self.timeouts.release_all().await;

        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            if let ListenerEvent::New(mut connection) = event {
                debug!("Closing unhandled session {}", connection.id());
                connection.close().await;
            }
        }
        info!("Listener on {} closed", self.local_addr);
    }
}

impl<L, S> Drop for Listener<L, S> {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

fn adopt<S: Send + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    sessions: &SessionTable,
) -> Result<Connection<S>> {
    let table = sessions.clone();
    let connection = Connection::with_owner(
        stream,
        Some(Box::new(move |id| {
            table.lock().remove(&id);
        })),
    )?;
    sessions.lock().insert(connection.id(), peer);
    Ok(connection)
}

async fn accept_loop<L: Send + 'static, S: Send + 'static>(
    listener: TcpListener,
    events: mpsc::UnboundedSender<ListenerEvent<L, S>>,
    sessions: SessionTable,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                info!("Accepted connection from {}", peer);
                match adopt::<S>(stream, peer, &sessions) {
                    Ok(connection) => {
                        if let Err(mpsc::error::SendError(ListenerEvent::New(mut connection))) =
                            events.send(ListenerEvent::New(connection))
                        {
                            connection.close().await;
                        }
                    }
                    Err(e) => warn!("Dropping connection from {}: {}", peer, e),
                }
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                sleep(ACCEPT_ERROR_PAUSE).await;
            }
        }
    }
    debug!("Accept loop finished");
}
