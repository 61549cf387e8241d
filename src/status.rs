// MIT License - Copyright (c) 2021 TJForc
// Status query reply

use std::fmt;

use bitflags::bitflags;

use crate::error::{BridgeError, Result};

bitflags! {
    /// General status byte, low five bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GeneralStatusFlags: u8 {
        const PROBLEMS         = 0x01;
        const SIREN            = 0x02;
        const ALL_ZONES_CLOSED = 0x04;
        const ZONES_IN_ALARM   = 0x08;
        const ZONES_BYPASSED   = 0x10;
    }
}

bitflags! {
    /// Per-partition status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartitionStatusFlags: u8 {
        const ARMED          = 0x01;
        const STAY_ARMED     = 0x02;
        const IN_ALARM       = 0x04;
        const ALARM_OCCURRED = 0x08;
        const READY          = 0x10;
        const EXIT_DELAY     = 0x20;
        const STAY           = 0x40;
        const ENABLED        = 0x80;
    }
}

const PARTITION_FLAG_NAMES: [(PartitionStatusFlags, &str); 7] = [
    (PartitionStatusFlags::STAY, "stay"),
    (PartitionStatusFlags::EXIT_DELAY, "exit delay"),
    (PartitionStatusFlags::READY, "ready"),
    (PartitionStatusFlags::ALARM_OCCURRED, "alarm occurred"),
    (PartitionStatusFlags::IN_ALARM, "in alarm"),
    (PartitionStatusFlags::STAY_ARMED, "armed stay"),
    (PartitionStatusFlags::ARMED, "armed"),
];

/// Overall arming state, bits 5-6 of the general status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmState {
    Disarmed,
    PartiallyArmed,
    Armed,
    Unknown(u8),
}

impl ArmState {
    fn from_status(byte: u8) -> Self {
        match (byte >> 5) & 0x03 {
            0 => Self::Disarmed,
            1 => Self::PartiallyArmed,
            3 => Self::Armed,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ArmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disarmed => write!(f, "disarmed"),
            Self::PartiallyArmed => write!(f, "some partitions armed"),
            Self::Armed => write!(f, "all partitions armed"),
            Self::Unknown(v) => write!(f, "unknown ({})", v),
        }
    }
}

const MODEL_OFFSET: usize = 0;
const FIRMWARE: std::ops::Range<usize> = 1..4;
const GENERAL_OFFSET: usize = 20;
const PARTITIONS_OFFSET: usize = 21;
const PARTITION_COUNT: usize = 17;
const OPEN_ZONES: std::ops::Range<usize> = 38..46;
const ALARM_ZONES: std::ops::Range<usize> = 46..54;
const BYPASSED_ZONES: std::ops::Range<usize> = 54..62;
const SIRENS: std::ops::Range<usize> = 62..64;
const MIN_STATUS_LEN: usize = 64;

/// Decoded reply to the status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub model: u8,
    pub firmware: [u8; 3],
    pub arm_state: ArmState,
    pub general: GeneralStatusFlags,
    /// (1-based partition number, flags), enabled partitions only
    pub partitions: Vec<(u8, PartitionStatusFlags)>,
    pub open_zones: Vec<u32>,
    pub alarm_zones: Vec<u32>,
    pub bypassed_zones: Vec<u32>,
    pub sirens: Vec<u32>,
}

/// Expand a bitmap into 1-based numbers, LSB of the first byte being 1.
pub fn bitmap_numbers(bitmap: &[u8]) -> Vec<u32> {
    let mut numbers = Vec::new();
    for (i, byte) in bitmap.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                numbers.push(1 + bit + (i as u32) * 8);
            }
        }
    }
    numbers
}

impl StatusReport {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < MIN_STATUS_LEN {
            return Err(BridgeError::InvalidReply {
                details: format!(
                    "status reply has {} bytes, need {}",
                    payload.len(),
                    MIN_STATUS_LEN
                ),
            });
        }
        let general = payload[GENERAL_OFFSET];
        let partitions = payload[PARTITIONS_OFFSET..PARTITIONS_OFFSET + PARTITION_COUNT]
            .iter()
            .enumerate()
            .map(|(i, b)| ((i + 1) as u8, PartitionStatusFlags::from_bits_retain(*b)))
            .filter(|(_, flags)| flags.contains(PartitionStatusFlags::ENABLED))
            .collect();

        Ok(Self {
            model: payload[MODEL_OFFSET],
            firmware: [payload[FIRMWARE.start], payload[FIRMWARE.start + 1], payload[FIRMWARE.start + 2]],
            arm_state: ArmState::from_status(general),
            general: GeneralStatusFlags::from_bits_truncate(general),
            partitions,
            open_zones: bitmap_numbers(&payload[OPEN_ZONES]),
            alarm_zones: bitmap_numbers(&payload[ALARM_ZONES]),
            bypassed_zones: bitmap_numbers(&payload[BYPASSED_ZONES]),
            sirens: bitmap_numbers(&payload[SIRENS]),
        })
    }

    pub fn model_name(&self) -> String {
        match self.model {
            0x01 => "AMT-8000".to_string(),
            other => format!("unknown ({:02x})", other),
        }
    }
}

fn write_numbers(f: &mut fmt::Formatter<'_>, label: &str, numbers: &[u32]) -> fmt::Result {
    if numbers.is_empty() {
        return Ok(());
    }
    let list: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
    writeln!(f, "{}: {}", label, list.join(" "))
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: {}", self.model_name())?;
        writeln!(
            f,
            "Firmware: {}.{}.{}",
            self.firmware[0], self.firmware[1], self.firmware[2]
        )?;
        writeln!(f, "State: {}", self.arm_state)?;
        if self.general.contains(GeneralStatusFlags::ZONES_IN_ALARM) {
            writeln!(f, "Zones in alarm")?;
        }
        if self.general.contains(GeneralStatusFlags::ZONES_BYPASSED) {
            writeln!(f, "Zones bypassed")?;
        }
        if self.general.contains(GeneralStatusFlags::ALL_ZONES_CLOSED) {
            writeln!(f, "All zones closed")?;
        }
        if self.general.contains(GeneralStatusFlags::SIREN) {
            writeln!(f, "Siren on")?;
        }
        if self.general.contains(GeneralStatusFlags::PROBLEMS) {
            writeln!(f, "Problems detected")?;
        }
        for (number, flags) in &self.partitions {
            let names: Vec<&str> = PARTITION_FLAG_NAMES
                .iter()
                .filter(|(flag, _)| flags.contains(*flag))
                .map(|(_, name)| *name)
                .collect();
            writeln!(f, "Partition {:02}: {}", number, names.join(", "))?;
        }
        write_numbers(f, "Open zones", &self.open_zones)?;
        write_numbers(f, "Zones in alarm", &self.alarm_zones)?;
        write_numbers(f, "Bypassed zones", &self.bypassed_zones)?;
        write_numbers(f, "Sirens on", &self.sirens)
    }
}
