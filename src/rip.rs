// MIT License - Copyright (c) 2021 TJForc
// RIP framing (panel to receiver)

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::codec::{checksum, contact_id_decode, from_bcd, to_bcd};
use crate::constants::{
    RIP_ALARM, RIP_ALARM_LEN, RIP_ALARM_PHOTO, RIP_ALARM_PHOTO_LEN, RIP_DATETIME,
    RIP_GENERIC_ACK, RIP_HEARTBEAT, RIP_IDENTIFICATION_LEN,
};
use crate::error::{BridgeError, Result};
use crate::event::{AlarmEvent, PhotoRef};

/// One frame taken off the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RipFrame {
    /// Short frame 0xF7
    Heartbeat,
    /// Long frame. `payload` keeps the trailing checksum octet.
    Long { tag: u8, payload: Vec<u8> },
    /// Long frame with a bad checksum or no tag. Still consumed.
    Invalid,
}

/// Take the first frame off `buf`.
///
/// `None` means more data is needed. Otherwise the caller must drop exactly the
/// returned number of bytes, including for `RipFrame::Invalid`.
pub fn extract_frame(buf: &[u8]) -> Option<(RipFrame, usize)> {
    let first = *buf.first()?;
    if first == RIP_HEARTBEAT {
        return Some((RipFrame::Heartbeat, 1));
    }
    if buf.len() < 2 {
        return None;
    }
    let expected = first as usize + 2;
    if buf.len() < expected {
        return None;
    }
    let raw = &buf[..expected];
    if first == 0 || checksum(raw) != 0 {
        return Some((RipFrame::Invalid, expected));
    }
    Some((
        RipFrame::Long {
            tag: raw[1],
            payload: raw[2..].to_vec(),
        },
        expected,
    ))
}

/// Wrap `data` as a long frame: `len | data | checksum`. `data` is at most 255 bytes.
pub fn encode_long(data: &[u8]) -> Vec<u8> {
    debug_assert!(
        data.len() <= u8::MAX as usize,
        "RIP frame of {} bytes does not fit the length byte",
        data.len()
    );
    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    frame.push(checksum(&frame));
    frame
}

pub fn generic_reply() -> Vec<u8> {
    encode_long(&[RIP_GENERIC_ACK])
}

/// Date/time answer: BCD year offset, month, day, weekday (Sunday = 0), h, m, s.
pub fn datetime_reply(now: NaiveDateTime) -> Result<Vec<u8>> {
    let year = (now.year() - 2000).clamp(0, 99) as u32;
    let data = [
        RIP_DATETIME,
        to_bcd(year)?,
        to_bcd(now.month())?,
        to_bcd(now.day())?,
        to_bcd(now.weekday().num_days_from_sunday())?,
        to_bcd(now.hour())?,
        to_bcd(now.minute())?,
        to_bcd(now.second())?,
    ];
    Ok(encode_long(&data))
}

/// Panel identity from an identification frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelIdentity {
    pub channel: u8,
    pub account: u32,
    /// Lowercase `aa:bb:cc`
    pub mac: String,
}

pub fn parse_identification(payload: &[u8]) -> Result<PanelIdentity> {
    if payload.len() != RIP_IDENTIFICATION_LEN {
        return Err(BridgeError::MalformedFrame {
            details: format!("identification with {} bytes", payload.len()),
        });
    }
    let mac = payload[3..6]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":");
    Ok(PanelIdentity {
        channel: payload[0],
        account: from_bcd(&payload[1..3])?,
        mac,
    })
}

/// Decode an alarm event (tag 0xB0) or an alarm event with photos (tag 0xB5).
pub fn parse_alarm(tag: u8, payload: &[u8]) -> Result<AlarmEvent> {
    let expected = match tag {
        RIP_ALARM => RIP_ALARM_LEN,
        RIP_ALARM_PHOTO => RIP_ALARM_PHOTO_LEN,
        other => {
            return Err(BridgeError::MalformedFrame {
                details: format!("tag {:02x} is not an alarm event", other),
            })
        }
    };
    if payload.len() != expected {
        return Err(BridgeError::MalformedFrame {
            details: format!(
                "alarm event {:02x} with {} bytes, expected {}",
                tag,
                payload.len(),
                expected
            ),
        });
    }

    let photo = if tag == RIP_ALARM_PHOTO {
        Some(PhotoRef {
            index: u16::from_be_bytes([payload[17], payload[18]]),
            count: payload[19],
        })
    } else {
        None
    };

    Ok(AlarmEvent {
        channel: payload[0],
        contact_id: contact_id_decode(&payload[1..5])?,
        message_type: contact_id_decode(&payload[5..7])?,
        qualifier: payload[7],
        code: contact_id_decode(&payload[8..11])?,
        partition: contact_id_decode(&payload[11..13])?,
        zone: contact_id_decode(&payload[13..16])?,
        photo,
    })
}
