// MIT License - Copyright (c) 2021 TJForc
// Outbound connect with an overall timeout

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::BridgeError;
use crate::transport::connection::Connection;

/// Single outcome of a dial attempt.
pub enum DialOutcome<K> {
    Connected(Connection<K>),
    NotConnected(BridgeError),
}

/// Connect attempt running in the background.
pub struct Dialer<K> {
    cancel: Option<oneshot::Sender<()>>,
    outcome: oneshot::Receiver<DialOutcome<K>>,
}

impl<K: Send + 'static> Dialer<K> {
    /// Start connecting to `addr` (`host:port`).
    pub fn start(addr: impl Into<String>, timeout: Duration) -> Self {
        let addr = addr.into();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = dial(&addr, timeout, cancel_rx).await;
            if outcome_tx.send(outcome).is_err() {
                debug!("Dial outcome for {} discarded", addr);
            }
        });
        Self {
            cancel: Some(cancel_tx),
            outcome: outcome_rx,
        }
    }
}

impl<K> Dialer<K> {
    /// Abandon the attempt. The outcome becomes `NotConnected(Cancelled)`
    /// unless the connection was already established.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub async fn outcome(self) -> DialOutcome<K> {
        let Dialer { cancel, outcome } = self;
        let result = outcome.await;
        // keep the cancel sender alive until the task answered
        drop(cancel);
        result.unwrap_or(DialOutcome::NotConnected(BridgeError::Disconnected))
    }
}

async fn dial<K: Send + 'static>(
    addr: &str,
    timeout: Duration,
    cancel: oneshot::Receiver<()>,
) -> DialOutcome<K> {
    info!("Connecting to {}", addr);
    let attempt = tokio::time::timeout(timeout, TcpStream::connect(addr));
    let stream = tokio::select! {
        Ok(()) = cancel => {
            info!("Connection to {} cancelled", addr);
            return DialOutcome::NotConnected(BridgeError::Cancelled);
        }
        result = attempt => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("TCP connect to {} failed: {}", addr, e);
                return DialOutcome::NotConnected(BridgeError::Io(e));
            }
            Err(_) => {
                error!("TCP connect to {} timed out", addr);
                return DialOutcome::NotConnected(BridgeError::ConnectionTimeout);
            }
        }
    };

    match Connection::spawn(stream) {
        Ok(connection) => {
            debug!("Connected to {}", addr);
            DialOutcome::Connected(connection)
        }
        Err(e) => DialOutcome::NotConnected(e),
    }
}
