// MIT License - Copyright (c) 2021 TJForc
// Outbound command variants

use std::fmt;

use crate::constants::{
    ALL_PARTITIONS, CMD_ARM_DISARM, CMD_BYPASS_ZONE, CMD_CLEAR_TRIP, CMD_SILENCE_SIREN,
    CMD_STATUS,
};
use crate::error::{BridgeError, Result};
use crate::status::StatusReport;

/// Remote access password with its configured digit width.
#[derive(Clone, PartialEq, Eq)]
pub struct Password {
    digits: u32,
    width: usize,
}

impl Password {
    /// Width must be 4 or 6 and the password must fit in it.
    pub fn new(digits: u32, width: usize) -> Result<Self> {
        if width != 4 && width != 6 {
            return Err(BridgeError::InvalidArgument {
                details: format!("password width must be 4 or 6, got {}", width),
            });
        }
        if digits >= 10u32.pow(width as u32) {
            return Err(BridgeError::InvalidArgument {
                details: format!("password does not fit in {} digits", width),
            });
        }
        Ok(Self { digits, width })
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password({} digits)", self.width)
    }
}

/// Arming mode byte of the arm/disarm command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArmMode {
    Disarm = 0,
    Arm = 1,
    Stay = 2,
}

/// What to do once authenticated.
///
/// Each variant knows the single frame it sends and how to read the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVariant {
    /// Authenticate and say goodbye. Useful to test credentials.
    NoOp,
    /// Full status query (0x0B4A)
    Status,
    /// Arm, disarm or stay-arm a partition (0x401E). `None` means all.
    ArmDisarm {
        partition: Option<u8>,
        mode: ArmMode,
    },
    /// Silence sirens (0x4019)
    SilenceSiren { partition: Option<u8> },
    /// Clear the alarm trip memory (0x4013)
    ClearTrip,
    /// Bypass or reactivate a zone (0x401F). Zone is 1-based.
    BypassZone { zone: u8, bypass: bool },
}

/// Reply of a successful command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// Command accepted, nothing to report.
    Ack,
    Status(StatusReport),
}

/// Name registry used by the CLI: `(name, argument help)`.
pub const COMMAND_NAMES: &[(&str, &str)] = &[
    ("noop", ""),
    ("status", ""),
    ("arm", "[partition]"),
    ("arm-stay", "[partition]"),
    ("disarm", "[partition]"),
    ("silence-siren", "[partition]"),
    ("clear-trip", ""),
    ("bypass-zone", "<zone>"),
    ("reactivate-zone", "<zone>"),
];

fn partition_arg(arg: Option<u8>) -> Option<u8> {
    arg.filter(|p| *p != 0)
}

fn zone_arg(name: &str, arg: Option<u8>) -> Result<u8> {
    match arg {
        Some(zone @ 1..=254) => Ok(zone),
        Some(zone) => Err(BridgeError::InvalidArgument {
            details: format!("{}: zone {} outside 1..=254", name, zone),
        }),
        None => Err(BridgeError::InvalidArgument {
            details: format!("{}: zone number required", name),
        }),
    }
}

impl CommandVariant {
    /// Look up a variant by CLI name. Partition 0 or absent means all partitions.
    pub fn from_name(name: &str, arg: Option<u8>) -> Result<Self> {
        let takes_arg = COMMAND_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, help)| !help.is_empty())
            .ok_or_else(|| BridgeError::InvalidArgument {
                details: format!("unknown command: {}", name),
            })?;
        if arg.is_some() && !takes_arg {
            return Err(BridgeError::InvalidArgument {
                details: format!("{} takes no argument", name),
            });
        }

        let variant = match name {
            "noop" => Self::NoOp,
            "status" => Self::Status,
            "arm" => Self::ArmDisarm {
                partition: partition_arg(arg),
                mode: ArmMode::Arm,
            },
            "arm-stay" => Self::ArmDisarm {
                partition: partition_arg(arg),
                mode: ArmMode::Stay,
            },
            "disarm" => Self::ArmDisarm {
                partition: partition_arg(arg),
                mode: ArmMode::Disarm,
            },
            "silence-siren" => Self::SilenceSiren {
                partition: partition_arg(arg),
            },
            "clear-trip" => Self::ClearTrip,
            "bypass-zone" => Self::BypassZone {
                zone: zone_arg(name, arg)?,
                bypass: true,
            },
            "reactivate-zone" => Self::BypassZone {
                zone: zone_arg(name, arg)?,
                bypass: false,
            },
            other => {
                return Err(BridgeError::InvalidArgument {
                    details: format!("unknown command: {}", other),
                })
            }
        };
        Ok(variant)
    }

    /// Command code and payload sent after authentication. `None` goes straight to bye.
    pub fn request(&self) -> Option<(u16, Vec<u8>)> {
        match *self {
            Self::NoOp => None,
            Self::Status => Some((CMD_STATUS, Vec::new())),
            Self::ArmDisarm { partition, mode } => Some((
                CMD_ARM_DISARM,
                vec![partition.unwrap_or(ALL_PARTITIONS), mode as u8],
            )),
            Self::SilenceSiren { partition } => Some((
                CMD_SILENCE_SIREN,
                vec![partition.unwrap_or(ALL_PARTITIONS)],
            )),
            Self::ClearTrip => Some((CMD_CLEAR_TRIP, Vec::new())),
            Self::BypassZone { zone, bypass } => {
                Some((CMD_BYPASS_ZONE, vec![zone - 1, bypass as u8]))
            }
        }
    }

    /// Interpret the payload of an accepted reply.
    pub fn interpret(&self, payload: &[u8]) -> Result<CommandReply> {
        match self {
            Self::Status => StatusReport::parse(payload).map(CommandReply::Status),
            _ => Ok(CommandReply::Ack),
        }
    }
}
