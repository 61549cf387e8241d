// MIT License - Copyright (c) 2021 TJForc
// Protocol constants

use std::time::Duration;

// ISECNet2 frame layout
pub const ISECNET_DST_ID: u16 = 0x0000;
pub const ISECNET_SRC_ID: u16 = 0x8FFF;
/// dst + src + length
pub const ISECNET_HEADER_LEN: usize = 6;
/// Header, command code and checksum.
pub const ISECNET_MIN_FRAME_LEN: usize = 9;

/// ISECNet2 command codes.
pub const CMD_AUTH: u16 = 0xF0F0;
pub const CMD_BYE: u16 = 0xF0F1;
pub const CMD_BUSY: u16 = 0xF0F7;
pub const CMD_NAK: u16 = 0xF0FD;
pub const CMD_ACK: u16 = 0xF0FE;
pub const CMD_STATUS: u16 = 0x0B4A;
pub const CMD_ARM_DISARM: u16 = 0x401E;
pub const CMD_SILENCE_SIREN: u16 = 0x4019;
pub const CMD_CLEAR_TRIP: u16 = 0x4013;
pub const CMD_BYPASS_ZONE: u16 = 0x401F;

/// Authentication payload framing bytes.
pub const SOFTWARE_TYPE: u8 = 0x02; // mobile app
pub const SOFTWARE_VERSION: u8 = 0x10;

/// Partition byte meaning "all partitions".
pub const ALL_PARTITIONS: u8 = 0xFF;

pub const COMMAND_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const COMMAND_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

// RIP
pub const RIP_HEARTBEAT: u8 = 0xF7;
pub const RIP_GENERIC_ACK: u8 = 0xFE;
pub const RIP_DATETIME: u8 = 0x80;
pub const RIP_IDENTIFICATION: u8 = 0x94;
pub const RIP_ALARM: u8 = 0xB0;
pub const RIP_ALARM_PHOTO: u8 = 0xB5;

/// Decoded payload lengths, trailing checksum octet included.
pub const RIP_IDENTIFICATION_LEN: usize = 7;
pub const RIP_ALARM_LEN: usize = 17;
pub const RIP_ALARM_PHOTO_LEN: usize = 20;

/// Contact-ID message type for standard events.
pub const CONTACT_ID_MESSAGE_TYPE: u32 = 18;

// Connection engine sizing
pub const RECV_BUFFER_SIZE: usize = 1500;
pub const SEND_QUEUE_DEPTH: usize = 2;

/// Default receiver port.
pub const DEFAULT_RECEIVER_PORT: u16 = 9010;

/// Event description templates keyed by Contact-ID event code.
///
/// `any` applies to every qualifier, `open` to qualifier 1 and `restore` to
/// qualifier 3. `{zone}` and `{partition}` are substituted.
#[derive(Debug, Clone, Copy)]
pub struct EventTemplate {
    pub code: u32,
    pub any: Option<&'static str>,
    pub open: Option<&'static str>,
    pub restore: Option<&'static str>,
}

const fn any(code: u32, text: &'static str) -> EventTemplate {
    EventTemplate {
        code,
        any: Some(text),
        open: None,
        restore: None,
    }
}

const fn open_restore(code: u32, open: &'static str, restore: &'static str) -> EventTemplate {
    EventTemplate {
        code,
        any: None,
        open: Some(open),
        restore: Some(restore),
    }
}

pub const EVENT_TEMPLATES: &[EventTemplate] = &[
    any(100, "Medical emergency"),
    any(110, "Fire alarm"),
    any(120, "Panic"),
    any(121, "Arming/disarming under duress"),
    any(122, "Silent panic"),
    open_restore(130, "Zone {zone} triggered", "Zone {zone} restored"),
    any(133, "24h zone {zone} triggered"),
    open_restore(
        145,
        "Expander device {zone} tamper",
        "Expander device {zone} tamper restored",
    ),
    any(146, "Silent trigger zone {zone}"),
    open_restore(
        147,
        "Supervision failure {zone}",
        "Supervision failure {zone} recovered",
    ),
    open_restore(301, "AC power lost", "AC power restored"),
    open_restore(302, "System battery low", "System battery low recovered"),
    any(305, "System reset"),
    any(306, "Programming changed"),
    open_restore(311, "Battery missing", "Battery missing recovered"),
    open_restore(
        342,
        "AC power lost on wireless device {zone}",
        "AC power restored on wireless device {zone}",
    ),
    open_restore(351, "Phone line cut", "Phone line restored"),
    any(354, "Failure to communicate event"),
    open_restore(383, "Sensor {zone} tamper", "Sensor {zone} tamper restored"),
    open_restore(
        384,
        "Low battery on wireless device {zone}",
        "Low battery on wireless device {zone} recovered",
    ),
    open_restore(401, "Manual disarm P{partition}", "Manual arm P{partition}"),
    open_restore(403, "Automatic disarm P{partition}", "Automatic arm P{partition}"),
    open_restore(404, "Remote disarm P{partition}", "Remote arm P{partition}"),
    open_restore(407, "Remote app disarm P{partition}", "Remote app arm P{partition}"),
    any(408, "One-key arm P{partition}"),
    any(410, "Remote access"),
    open_restore(422, "PGM {zone} on", "PGM {zone} off"),
    any(461, "Wrong password"),
    open_restore(533, "Zone {zone} added", "Zone {zone} removed"),
    open_restore(570, "Zone {zone} bypassed", "Zone {zone} bypass cancelled"),
    any(601, "Manual test"),
    any(602, "Periodic test"),
    any(616, "Maintenance request"),
    any(621, "Event buffer reset"),
    any(625, "Date and time reset"),
];
