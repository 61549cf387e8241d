// MIT License - Copyright (c) 2021 TJForc
// ISECNet2 client: connect, authenticate, one command, bye

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::hex_dump;
use crate::command::{CommandReply, CommandVariant, Password};
use crate::constants::{
    CMD_ACK, CMD_AUTH, CMD_BUSY, CMD_NAK, COMMAND_CONNECT_TIMEOUT, COMMAND_IDLE_TIMEOUT,
};
use crate::error::{AuthFailure, BridgeError, NakReason, Result};
use crate::isecnet;
use crate::timeout::Timeout;
use crate::transport::{Connection, DialOutcome, Dialer, Event};

/// Progress of a command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Connecting,
    Authenticating,
    AwaitingReply,
    Closing,
    Done,
}

/// Key of the single inactivity timer.
#[derive(Debug, Clone, Copy)]
pub struct Idle;

/// What the next frame from the panel is expected to answer.
#[derive(Debug, Clone, Copy)]
enum Handler {
    Authentication,
    Reply { command: u16 },
}

/// One command run against one panel.
#[derive(Debug, Clone)]
pub struct CommandSession {
    addr: String,
    password: Password,
    variant: CommandVariant,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl CommandSession {
    pub fn new(addr: impl Into<String>, password: Password, variant: CommandVariant) -> Self {
        Self {
            addr: addr.into(),
            password,
            variant,
            connect_timeout: COMMAND_CONNECT_TIMEOUT,
            idle_timeout: COMMAND_IDLE_TIMEOUT,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Run the exchange to completion. The single result is the outcome.
    pub async fn run(self) -> Result<CommandReply> {
        let connection = match Dialer::start(self.addr.clone(), self.connect_timeout)
            .outcome()
            .await
        {
            DialOutcome::Connected(connection) => connection,
            DialOutcome::NotConnected(e) => {
                warn!("Could not connect to {}: {}", self.addr, e);
                return Err(e);
            }
        };

        let idle = connection.timeout(self.idle_timeout, Duration::ZERO, Idle);
        let mut exchange = Exchange {
            connection,
            idle,
            buffer: Vec::new(),
            handler: None,
            state: CommandState::Connecting,
            variant: self.variant,
            pending: None,
        };
        let result = exchange.drive(&self.password).await;
        exchange.connection.close().await;
        exchange.transition(CommandState::Done);

        match &result {
            Ok(_) => info!("Command {:?} succeeded", self.variant),
            Err(e) => warn!("Command {:?} failed: {}", self.variant, e),
        }
        result
    }
}

struct Exchange {
    connection: Connection<Idle>,
    idle: Timeout,
    buffer: Vec<u8>,
    handler: Option<Handler>,
    state: CommandState,
    variant: CommandVariant,
    /// Decided result, delivered once the panel lets go after bye
    pending: Option<CommandReply>,
}

impl Exchange {
    fn transition(&mut self, state: CommandState) {
        debug!("Command state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    async fn drive(&mut self, password: &Password) -> Result<CommandReply> {
        self.transition(CommandState::Authenticating);
        self.send_frame(isecnet::auth_frame(password)?).await?;
        self.handler = Some(Handler::Authentication);

        loop {
            let Some(event) = self.connection.next_event().await else {
                return self.finish(BridgeError::Disconnected);
            };
            match event {
                Event::Recv(data) => {
                    self.buffer.extend_from_slice(&data);
                    self.process_buffer().await?;
                }
                Event::Sent(_) => {}
                Event::Timeout(Idle) => return self.finish(BridgeError::IdleTimeout),
                Event::RecvEof | Event::SendEof => return self.finish(BridgeError::Disconnected),
                Event::Err(e) => return self.finish(BridgeError::Io(e)),
            }
        }
    }

    /// End of the connection: success if bye was already sent, else `cause`.
    fn finish(&mut self, cause: BridgeError) -> Result<CommandReply> {
        match self.pending.take() {
            Some(reply) if self.state == CommandState::Closing => Ok(reply),
            _ => Err(cause),
        }
    }

    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        self.connection.send(frame).await?;
        self.idle.restart().await;
        Ok(())
    }

    async fn process_buffer(&mut self) -> Result<()> {
        loop {
            let len = isecnet::frame_complete(&self.buffer);
            if len == 0 {
                return Ok(());
            }
            let frame: Vec<u8> = self.buffer.drain(..len).collect();
            self.on_frame(&frame).await?;
        }
    }

    async fn on_frame(&mut self, frame: &[u8]) -> Result<()> {
        if !isecnet::frame_valid(frame) {
            return Err(BridgeError::MalformedFrame {
                details: hex_dump(frame),
            });
        }
        let (command, payload) = isecnet::decode(frame)?;
        debug!("Reply {:04x}: {}", command, hex_dump(&payload));

        match command {
            CMD_NAK => {
                let reason = match payload.as_slice() {
                    [reason] => Some(NakReason::from_code(*reason)),
                    _ => None,
                };
                warn!("Panel answered NAK, reason {:?}", reason);
                return Err(BridgeError::Nak { reason });
            }
            CMD_BUSY => {
                warn!("Panel busy");
                return Err(BridgeError::PanelBusy);
            }
            _ => {}
        }

        match self.handler.take() {
            None => Err(BridgeError::NoHandler { command }),
            Some(Handler::Authentication) => self.on_auth_reply(command, &payload).await,
            Some(Handler::Reply { command: sent }) => {
                self.on_command_reply(sent, command, &payload).await
            }
        }
    }

    async fn on_auth_reply(&mut self, command: u16, payload: &[u8]) -> Result<()> {
        if command != CMD_AUTH {
            return Err(BridgeError::UnexpectedCommand {
                expected: CMD_AUTH,
                got: command,
            });
        }
        let [code] = payload else {
            return Err(BridgeError::InvalidReply {
                details: format!("authentication reply with {} bytes", payload.len()),
            });
        };
        if let Some(failure) = AuthFailure::from_code(*code) {
            warn!("Authentication rejected: {}", failure);
            return Err(BridgeError::AuthRejected(failure));
        }
        info!("Authenticated");
        self.authenticated().await
    }

    /// Hand the session to the command variant.
    async fn authenticated(&mut self) -> Result<()> {
        match self.variant.request() {
            None => self.bye(CommandReply::Ack).await,
            Some((command, payload)) => {
                self.transition(CommandState::AwaitingReply);
                debug!("Sending command {:04x}", command);
                self.send_frame(isecnet::encode(command, &payload)).await?;
                self.handler = Some(Handler::Reply { command });
                Ok(())
            }
        }
    }

    async fn on_command_reply(&mut self, sent: u16, command: u16, payload: &[u8]) -> Result<()> {
        if command != sent && command != CMD_ACK {
            return Err(BridgeError::UnexpectedCommand {
                expected: sent,
                got: command,
            });
        }
        let reply = self.variant.interpret(payload)?;
        self.bye(reply).await
    }

    /// Say goodbye and close our sending side. The panel or the idle timer ends it.
    async fn bye(&mut self, reply: CommandReply) -> Result<()> {
        self.transition(CommandState::Closing);
        self.send_frame(isecnet::bye_frame()).await?;
        self.connection.shutdown().await?;
        self.pending = Some(reply);
        Ok(())
    }
}
