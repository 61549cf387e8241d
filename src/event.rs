// MIT License - Copyright (c) 2021 TJForc
// Alarm events reported over RIP

use std::fmt;

use crate::constants::{CONTACT_ID_MESSAGE_TYPE, EVENT_TEMPLATES};

/// Photo metadata carried by 0xB5 events. Never dereferenced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoRef {
    pub index: u16,
    pub count: u8,
}

/// Decoded alarm event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEvent {
    /// 0x11 Ethernet IP1, 0x12 Ethernet IP2, 0x21 GPRS IP1, 0x22 GPRS IP2
    pub channel: u8,
    pub contact_id: u32,
    /// 18 for Contact-ID
    pub message_type: u32,
    /// 1 open/trip, 3 restore
    pub qualifier: u8,
    pub code: u32,
    pub partition: u32,
    pub zone: u32,
    pub photo: Option<PhotoRef>,
}

/// Qualifier of a newly opened (tripped) event.
pub const QUALIFIER_OPEN: u8 = 1;
/// Qualifier of a restored event.
pub const QUALIFIER_RESTORE: u8 = 3;

impl AlarmEvent {
    /// Known description for this event, if the code is in the table.
    pub fn known_description(&self) -> Option<String> {
        if self.message_type != CONTACT_ID_MESSAGE_TYPE {
            return None;
        }
        let template = EVENT_TEMPLATES.iter().find(|t| t.code == self.code)?;
        let text = match self.qualifier {
            QUALIFIER_OPEN => template.open.or(template.any),
            QUALIFIER_RESTORE => template.restore.or(template.any),
            _ => template.any,
        }?;
        Some(
            text.replace("{zone}", &self.zone.to_string())
                .replace("{partition}", &format!("{:02}", self.partition)),
        )
    }

    /// Human-readable description, known or generic.
    pub fn describe(&self) -> String {
        let mut text = self.known_description().unwrap_or_else(|| {
            format!(
                "Alarm event channel {:02x} contact_id {} type {} qualifier {} code {} partition {} zone {}",
                self.channel,
                self.contact_id,
                self.message_type,
                self.qualifier,
                self.code,
                self.partition,
                self.zone
            )
        });
        if let Some(photo) = self.photo {
            text.push_str(&format!(" (with photos, i={} n={})", photo.index, photo.count));
        }
        text
    }

    /// Argument of the event hook: `code partition zone qualifier`.
    pub fn hook_argument(&self) -> String {
        format!(
            "{} {} {} {}",
            self.code, self.partition, self.zone, self.qualifier
        )
    }
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
