// MIT License - Copyright (c) 2021 TJForc
// ISECNet2 framing

use crate::codec::{be16_decode, be16_encode, checksum, contact_id_encode};
use crate::command::Password;
use crate::constants::{
    CMD_AUTH, CMD_BYE, ISECNET_DST_ID, ISECNET_HEADER_LEN, ISECNET_MIN_FRAME_LEN,
    ISECNET_SRC_ID, SOFTWARE_TYPE, SOFTWARE_VERSION,
};
use crate::error::{BridgeError, Result};

/// Build a frame: `dst | src | length | command | payload | checksum`.
///
/// The length field is 16 bits wide, so `payload` must stay below 64 KiB.
pub fn encode(command: u16, payload: &[u8]) -> Vec<u8> {
    debug_assert!(
        payload.len() <= u16::MAX as usize - 2,
        "ISECNet2 payload of {} bytes does not fit the length field",
        payload.len()
    );
    let mut frame = Vec::with_capacity(ISECNET_HEADER_LEN + 2 + payload.len() + 1);
    frame.extend_from_slice(&be16_encode(ISECNET_DST_ID));
    frame.extend_from_slice(&be16_encode(ISECNET_SRC_ID));
    frame.extend_from_slice(&be16_encode((payload.len() + 2) as u16));
    frame.extend_from_slice(&be16_encode(command));
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

/// Length of the first frame in `buf` once it is fully buffered, else 0.
pub fn frame_complete(buf: &[u8]) -> usize {
    if buf.len() < ISECNET_MIN_FRAME_LEN {
        return 0;
    }
    let declared = match be16_decode(&buf[4..6]) {
        Ok(n) => n as usize,
        Err(_) => return 0,
    };
    let total = ISECNET_HEADER_LEN + declared + 1;
    if buf.len() < total {
        return 0;
    }
    total
}

/// Whether `frame` is exactly one well-formed frame with a valid checksum.
pub fn frame_valid(frame: &[u8]) -> bool {
    if frame.len() < ISECNET_MIN_FRAME_LEN {
        return false;
    }
    let declared = match be16_decode(&frame[4..6]) {
        Ok(n) => n as usize,
        Err(_) => return false,
    };
    declared >= 2 && frame.len() == ISECNET_HEADER_LEN + declared + 1 && checksum(frame) == 0
}

/// Split a validated frame into `(command, payload)`.
pub fn decode(frame: &[u8]) -> Result<(u16, Vec<u8>)> {
    if !frame_valid(frame) {
        return Err(BridgeError::MalformedFrame {
            details: format!("{} bytes failed validation", frame.len()),
        });
    }
    let command = be16_decode(&frame[6..8])?;
    let payload = frame[8..frame.len() - 1].to_vec();
    Ok((command, payload))
}

/// Authentication request carrying the Contact-ID encoded password.
pub fn auth_frame(password: &Password) -> Result<Vec<u8>> {
    let mut payload = vec![SOFTWARE_TYPE];
    payload.extend(contact_id_encode(password.digits(), password.width())?);
    payload.push(SOFTWARE_VERSION);
    Ok(encode(CMD_AUTH, &payload))
}

pub fn bye_frame() -> Vec<u8> {
    encode(CMD_BYE, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not fit the length field")]
    fn test_encode_rejects_oversized_payload() {
        encode(CMD_AUTH, &vec![0u8; u16::MAX as usize]);
    }

    const AUTH_123456: [u8; 17] = [
        0x00, 0x00, 0x8F, 0xFF, 0x00, 0x0A, 0xF0, 0xF0, 0x02, 0x01, 0x02, 0x03, 0x04, 0x05,
        0x06, 0x10, 0x90,
    ];

    #[test]
    fn test_auth_frame() {
        let password = Password::new(123456, 6).unwrap();
        assert_eq!(auth_frame(&password).unwrap(), AUTH_123456.to_vec());

        let password = Password::new(1034, 4).unwrap();
        assert_eq!(
            auth_frame(&password).unwrap(),
            vec![0, 0, 143, 255, 0, 8, 240, 240, 2, 1, 10, 3, 4, 16, 153]
        );
    }

    #[test]
    fn test_bye_frame() {
        assert_eq!(bye_frame(), vec![0, 0, 143, 255, 0, 2, 240, 241, 140]);
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(0xbabe, &[]), vec![0, 0, 143, 255, 0, 2, 186, 190, 137]);
        assert_eq!(
            encode(0xcafe, &[0xba, 0xbe]),
            vec![0, 0, 143, 255, 0, 4, 202, 254, 186, 190, 187]
        );
    }

    #[test]
    fn test_frame_complete_prefixes() {
        assert_eq!(frame_complete(&[]), 0);
        for i in 0..AUTH_123456.len() {
            assert_eq!(frame_complete(&AUTH_123456[..i]), 0, "prefix {}", i);
        }
        assert_eq!(frame_complete(&AUTH_123456), AUTH_123456.len());

        let mut two = AUTH_123456.to_vec();
        two.extend_from_slice(&bye_frame());
        assert_eq!(frame_complete(&two), AUTH_123456.len());
    }

    #[test]
    fn test_frame_valid() {
        for i in 6..AUTH_123456.len() {
            assert!(!frame_valid(&AUTH_123456[..i]), "prefix {}", i);
        }
        assert!(frame_valid(&AUTH_123456));

        let mut corrupt = AUTH_123456;
        corrupt[10] ^= 0x40;
        assert!(!frame_valid(&corrupt));
    }

    #[test]
    fn test_frame_valid_rejects_short_length() {
        // declared length 1 leaves no room for a command code
        let mut frame = vec![0x00, 0x00, 0x8F, 0xFF, 0x00, 0x01, 0xF0];
        frame.push(checksum(&frame));
        frame.push(0x00);
        assert!(!frame_valid(&frame));
    }

    #[test]
    fn test_decode() {
        let (command, payload) = decode(&AUTH_123456).unwrap();
        assert_eq!(command, CMD_AUTH);
        assert_eq!(payload, vec![0x02, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x10]);

        let (command, payload) = decode(&bye_frame()).unwrap();
        assert_eq!(command, CMD_BYE);
        assert!(payload.is_empty());

        assert!(decode(&AUTH_123456[..10]).is_err());
    }
}
