// MIT License - Copyright (c) 2021 TJForc
// RIP event receiver: one session per panel connection

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ReceiverConfig;
use crate::constants::{RIP_ALARM, RIP_ALARM_PHOTO, RIP_DATETIME, RIP_IDENTIFICATION};
use crate::error::Result;
use crate::hooks::{Hook, HookSink};
use crate::rip::{self, PanelIdentity, RipFrame};
use crate::timeout::Timeout;
use crate::transport::{Connection, Event, Listener, ListenerEvent, SessionTable};

const HOOK_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Timers shared by the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTimer {
    Watchdog,
    NoPanel,
}

/// Per-session timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimer {
    Identification,
    Communication,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingIdentification,
    Active,
}

struct SessionContext {
    config: ReceiverConfig,
    hooks: Arc<dyn HookSink>,
    /// Sessions whose panel has identified itself
    identified: AtomicUsize,
    sessions: SessionTable,
}

fn timestamp() -> String {
    Local::now().format(HOOK_TIME_FORMAT).to_string()
}

/// Count one more identified panel unless `max` are already counted.
fn reserve_identified(identified: &AtomicUsize, max: Option<usize>) -> bool {
    match max {
        Some(max) => identified
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok(),
        None => {
            identified.fetch_add(1, Ordering::SeqCst);
            true
        }
    }
}

/// Listening service. Each accepted panel gets its own session task.
pub struct Receiver {
    listener: Listener<ServiceTimer, SessionTimer>,
    context: Arc<SessionContext>,
    watchdog: Timeout,
    no_panel: Timeout,
    stop_tx: watch::Sender<bool>,
    sessions: JoinSet<()>,
}

impl Receiver {
    pub async fn bind(config: ReceiverConfig, hooks: Arc<dyn HookSink>) -> Result<Self> {
        let listener = Listener::bind(&config.listen_addr()).await?;
        let watchdog = listener.timeout(config.watchdog_interval, Duration::ZERO, ServiceTimer::Watchdog);
        let no_panel = listener.timeout(config.no_panel_alarm, Duration::ZERO, ServiceTimer::NoPanel);
        let (stop_tx, _) = watch::channel(false);
        let context = Arc::new(SessionContext {
            config,
            hooks,
            identified: AtomicUsize::new(0),
            sessions: listener.sessions(),
        });
        Ok(Self {
            listener,
            context,
            watchdog,
            no_panel,
            stop_tx,
            sessions: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` completes, then close every session.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.listener.next_event() => match event {
                    None => break,
                    Some(ListenerEvent::New(connection)) => self.start_session(connection),
                    Some(ListenerEvent::Timeout(timer)) => self.on_timeout(timer).await,
                },
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        info!("Receiver shutting down");
        let _ = self.stop_tx.send(true);
        self.listener.close().await;
        while let Some(joined) = self.sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }
    }

    fn start_session(&mut self, connection: Connection<SessionTimer>) {
        let session = PanelSession::new(connection, self.context.clone(), self.stop_tx.subscribe());
        self.sessions.spawn(session.run());
    }

    async fn on_timeout(&mut self, timer: ServiceTimer) {
        match timer {
            ServiceTimer::Watchdog => {
                debug!("Watchdog");
                self.context.hooks.invoke(Hook::Watchdog, timestamp());
                self.watchdog.restart().await;
            }
            ServiceTimer::NoPanel => {
                if self.context.identified.load(Ordering::SeqCst) == 0 {
                    warn!("No panel connected");
                    self.context
                        .hooks
                        .invoke(Hook::Central, "no panel connected".to_string());
                }
                self.no_panel.restart().await;
            }
        }
    }
}

/// Conversation with one panel.
struct PanelSession {
    connection: Connection<SessionTimer>,
    context: Arc<SessionContext>,
    stop: watch::Receiver<bool>,
    buffer: Vec<u8>,
    identity: Option<PanelIdentity>,
    /// Input is discarded: over a connection limit or unknown panel
    ignored: bool,
    ident_timer: Option<Timeout>,
    comm_timer: Timeout,
    incomplete_timer: Option<Timeout>,
}

impl PanelSession {
    fn new(
        connection: Connection<SessionTimer>,
        context: Arc<SessionContext>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let config = &context.config;
        let ident_timer =
            connection.timeout(config.ident_timeout, Duration::ZERO, SessionTimer::Identification);
        let comm_timer =
            connection.timeout(config.comm_timeout, Duration::ZERO, SessionTimer::Communication);

        // the table already counts this session
        let ignored = config
            .max_connections
            .is_some_and(|max| context.sessions.len() > max);
        if ignored {
            warn!(
                "Too many connections, ignoring {} (session {})",
                connection.peer(),
                connection.id()
            );
        } else {
            info!("Panel connected from {}", connection.peer());
        }

        Self {
            connection,
            context,
            stop,
            buffer: Vec::new(),
            identity: None,
            ignored,
            ident_timer: Some(ident_timer),
            comm_timer,
            incomplete_timer: None,
        }
    }

    fn state(&self) -> SessionState {
        match self.identity {
            Some(_) => SessionState::Active,
            None => SessionState::AwaitingIdentification,
        }
    }

    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.stop.changed() => break,
                event = self.connection.next_event() => event,
            };
            let Some(event) = event else {
                break;
            };
            let keep_going = match event {
                Event::Recv(data) => self.on_data(data).await,
                Event::Sent(_) => true,
                Event::Timeout(timer) => self.on_timeout(timer).await,
                Event::RecvEof => {
                    info!("Panel {} closed the connection", self.connection.peer());
                    false
                }
                Event::SendEof => {
                    info!("Panel {} stopped receiving", self.connection.peer());
                    false
                }
                Event::Err(e) => {
                    warn!("Session with {} failed: {}", self.connection.peer(), e);
                    false
                }
            };
            if !keep_going {
                break;
            }
        }
        self.finish().await;
    }

    /// `false` closes the session. Firings of timers since restarted or freed are ignored.
    async fn on_timeout(&mut self, timer: SessionTimer) -> bool {
        let current = match timer {
            SessionTimer::Identification => self.ident_timer.as_ref(),
            SessionTimer::Communication => Some(&self.comm_timer),
            SessionTimer::Incomplete => self.incomplete_timer.as_ref(),
        };
        let Some(current) = current else {
            return true;
        };
        if current.info().await.alive {
            return true;
        }
        match timer {
            SessionTimer::Identification => {
                warn!("Panel {} did not identify itself", self.connection.peer())
            }
            SessionTimer::Communication => {
                warn!("Panel {} went quiet", self.connection.peer())
            }
            SessionTimer::Incomplete => {
                warn!(
                    "Panel {} left an incomplete frame ({} bytes)",
                    self.connection.peer(),
                    self.buffer.len()
                )
            }
        }
        false
    }

    async fn on_data(&mut self, data: Vec<u8>) -> bool {
        if self.ignored {
            debug!("Ignoring {} bytes from {}", data.len(), self.connection.peer());
            return true;
        }
        self.buffer.extend_from_slice(&data);

        let mut consumed_any = false;
        while let Some((frame, consumed)) = rip::extract_frame(&self.buffer) {
            self.buffer.drain(..consumed);
            consumed_any = true;
            self.comm_timer.restart().await;

            if let Some(reply) = self.dispatch(frame).await {
                if !self.reply(reply).await {
                    return false;
                }
            }
            if self.ignored {
                self.buffer.clear();
                break;
            }
        }

        if consumed_any {
            if let Some(timer) = self.incomplete_timer.take() {
                timer.free().await;
            }
        }
        if !self.buffer.is_empty() && self.incomplete_timer.is_none() {
            self.incomplete_timer = Some(self.connection.timeout(
                self.context.config.incomplete_timeout,
                Duration::ZERO,
                SessionTimer::Incomplete,
            ));
        }
        true
    }

    /// Queue a reply. A panel that stops reading gets one communication
    /// timeout to drain the queue before the session is closed.
    async fn reply(&mut self, data: Vec<u8>) -> bool {
        let limit = self.context.config.comm_timeout;
        tokio::select! {
            result = self.connection.send(data) => match result {
                Ok(()) => true,
                Err(e) => {
                    warn!("Reply to {} failed: {}", self.connection.peer(), e);
                    false
                }
            },
            _ = self.stop.changed() => false,
            _ = tokio::time::sleep(limit) => {
                warn!("Panel {} is not reading replies", self.connection.peer());
                false
            }
        }
    }

    /// Handle one frame and produce its reply, if any.
    async fn dispatch(&mut self, frame: RipFrame) -> Option<Vec<u8>> {
        match frame {
            RipFrame::Heartbeat => {
                debug!("Heartbeat from {}", self.connection.peer());
                Some(rip::generic_reply())
            }
            RipFrame::Invalid => {
                warn!("Invalid frame from {}", self.connection.peer());
                Some(rip::generic_reply())
            }
            RipFrame::Long { tag, payload } => match tag {
                RIP_DATETIME => match rip::datetime_reply(Local::now().naive_local()) {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        warn!("Cannot encode date/time: {}", e);
                        Some(rip::generic_reply())
                    }
                },
                RIP_IDENTIFICATION => self.on_identification(&payload).await,
                RIP_ALARM | RIP_ALARM_PHOTO => {
                    self.on_alarm(tag, &payload);
                    Some(rip::generic_reply())
                }
                other => {
                    info!(
                        "Unknown message {:02x} from {} ({:?})",
                        other,
                        self.connection.peer(),
                        self.state()
                    );
                    Some(rip::generic_reply())
                }
            },
        }
    }

    async fn on_identification(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        let identity = match rip::parse_identification(payload) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Bad identification from {}: {}", self.connection.peer(), e);
                return Some(rip::generic_reply());
            }
        };

        if !self.context.config.is_authorized(&identity.mac) {
            warn!(
                "Panel {} (account {}) is not authorized, ignoring",
                identity.mac, identity.account
            );
            self.ignored = true;
            return None;
        }

        let first = self.identity.is_none();
        if first {
            let max = self.context.config.max_connections;
            if !reserve_identified(&self.context.identified, max) {
                warn!(
                    "Too many panels identified, ignoring {} (account {})",
                    identity.mac, identity.account
                );
                self.ignored = true;
                return None;
            }
        }

        info!(
            "Panel identified: account {} mac {} channel {:02x}",
            identity.account, identity.mac, identity.channel
        );
        if first {
            self.context.hooks.invoke(
                Hook::Central,
                format!("connected {} {}", identity.account, identity.mac),
            );
        }
        if let Some(timer) = self.ident_timer.take() {
            timer.free().await;
        }
        self.identity = Some(identity);
        Some(rip::generic_reply())
    }

    fn on_alarm(&self, tag: u8, payload: &[u8]) {
        let event = match rip::parse_alarm(tag, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Discarding alarm event from {}: {}", self.connection.peer(), e);
                return;
            }
        };
        let description = event.describe();
        info!("Alarm event: {}", description);
        self.context.hooks.invoke(Hook::Event, event.hook_argument());
        self.context
            .hooks
            .invoke(Hook::Message, format!("{} {}", timestamp(), description));
    }

    async fn finish(mut self) {
        self.connection.close().await;
        if let Some(identity) = self.identity.take() {
            self.context.identified.fetch_sub(1, Ordering::SeqCst);
            self.context.hooks.invoke(
                Hook::Central,
                format!("disconnected {} {}", identity.account, identity.mac),
            );
        }
        info!("Session with {} ended", self.connection.peer());
    }
}
