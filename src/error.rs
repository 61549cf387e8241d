// MIT License - Copyright (c) 2021 TJForc
// ISECNet2 / RIP bridge

use std::fmt;

/// Reasons the panel gives for rejecting an authentication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    /// 0x01 - Wrong password
    WrongPassword,
    /// 0x02 - Wrong software version
    WrongSoftwareVersion,
    /// 0x03 - Panel will call back
    WillCallBack,
    /// 0x04 - Awaiting user permission
    AwaitingPermission,
    /// Any other non-zero reply byte
    Other(u8),
}

impl AuthFailure {
    /// Map the one-byte authentication reply. Zero means success and yields `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => None,
            0x01 => Some(Self::WrongPassword),
            0x02 => Some(Self::WrongSoftwareVersion),
            0x03 => Some(Self::WillCallBack),
            0x04 => Some(Self::AwaitingPermission),
            other => Some(Self::Other(other)),
        }
    }

    /// Human-readable description of the failure.
    pub fn description(&self) -> &'static str {
        match self {
            Self::WrongPassword => "wrong password",
            Self::WrongSoftwareVersion => "wrong software version",
            Self::WillCallBack => "panel will call back",
            Self::AwaitingPermission => "awaiting user permission",
            Self::Other(_) => "unknown reason",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::WrongPassword => 0x01,
            Self::WrongSoftwareVersion => 0x02,
            Self::WillCallBack => 0x03,
            Self::AwaitingPermission => 0x04,
            Self::Other(code) => *code,
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}: {}", self.code(), self.description())
    }
}

/// Reason byte carried by a NAK reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NakReason(pub u8);

impl NakReason {
    pub fn from_code(code: u8) -> Self {
        Self(code)
    }

    pub fn code(&self) -> u8 {
        self.0
    }

    pub fn description(&self) -> &'static str {
        match self.0 {
            0x00 => "message ok",
            0x01 => "checksum error",
            0x02 => "wrong message length",
            0x03 => "wrong parameter length",
            0x04 => "no such parameter",
            0x05 => "parameter index",
            0x06 => "above maximum value",
            0x07 => "below minimum value",
            0x08 => "wrong field count",
            0x09..=0x0c => "invalid nibble",
            0x0d => "invalid ASCII",
            0x0e => "February 29th",
            0x0f => "invalid day",
            0x10 => "invalid month",
            0x11 => "invalid year",
            0x12 => "invalid hour",
            0x13 => "invalid minute",
            0x14 => "invalid second",
            0x15 => "invalid command type",
            0x16 => "special key",
            0x17 => "wrong digit count",
            0x18 => "wrong password length",
            0x19 => "wrong password",
            0x1a => "no such partition",
            0x1b => "user lacks permission on partition",
            0x1c => "no programming permission",
            0x1d => "receive buffer full",
            0x1e => "no permission to disarm",
            0x1f => "authentication required",
            0x20 => "no zones enabled",
            0x21 => "no permission for command",
            0x22 => "no partitions defined",
            0x23 => "event has no photo",
            0x28 => "photo not yet stored",
            _ => "unknown reason",
        }
    }
}

impl fmt::Display for NakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}: {}", self.0, self.description())
    }
}

fn nak_text(reason: &Option<NakReason>) -> String {
    match reason {
        Some(reason) => reason.to_string(),
        None => "no reason".to_string(),
    }
}

/// All errors that can occur in the isecnet-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Socket disconnected")]
    Disconnected,

    #[error("Idle timeout waiting for the panel")]
    IdleTimeout,

    #[error("Invalid BCD value: {details}")]
    InvalidBcd { details: String },

    #[error("Invalid Contact-ID value: {details}")]
    InvalidContactId { details: String },

    #[error("Truncated input: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("Malformed frame: {details}")]
    MalformedFrame { details: String },

    #[error("Unexpected reply command {got:04x} (expected {expected:04x})")]
    UnexpectedCommand { expected: u16, got: u16 },

    #[error("Invalid reply: {details}")]
    InvalidReply { details: String },

    #[error("Authentication rejected: {0}")]
    AuthRejected(AuthFailure),

    #[error("Panel answered NAK ({})", nak_text(.reason))]
    Nak { reason: Option<NakReason> },

    #[error("Panel busy")]
    PanelBusy,

    #[error("No reply handler for command {command:04x}")]
    NoHandler { command: u16 },

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },
}

impl BridgeError {
    /// Whether this error came from the transport rather than the protocol.
    ///
    /// Callers may re-run a whole command after a transport failure; protocol
    /// failures will repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Io(_)
                | BridgeError::ConnectionTimeout
                | BridgeError::Disconnected
                | BridgeError::IdleTimeout
                | BridgeError::PanelBusy
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
