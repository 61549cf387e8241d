// MIT License - Copyright (c) 2021 TJForc
// Field encodings shared by ISECNet2 and RIP

use crate::error::{BridgeError, Result};

/// XOR of all bytes, complemented.
///
/// Both protocols append this byte to a frame; checksumming the result
/// (frame plus trailing byte) yields 0.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b) ^ 0xFF
}

pub fn be16_encode(n: u16) -> [u8; 2] {
    n.to_be_bytes()
}

pub fn be16_decode(data: &[u8]) -> Result<u16> {
    match data {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(BridgeError::Truncated {
            needed: 2,
            got: data.len(),
        }),
    }
}

/// Pack a number in 0..=99 as one BCD byte.
pub fn to_bcd(n: u32) -> Result<u8> {
    if n > 99 {
        return Err(BridgeError::InvalidBcd {
            details: format!("{} does not fit one byte", n),
        });
    }
    Ok((((n / 10) << 4) | (n % 10)) as u8)
}

/// Decode a run of BCD bytes, most significant first.
pub fn from_bcd(data: &[u8]) -> Result<u32> {
    let mut n: u32 = 0;
    for &b in data {
        let (hi, lo) = ((b >> 4) as u32, (b & 0x0F) as u32);
        if hi > 9 || lo > 9 {
            return Err(BridgeError::InvalidBcd {
                details: format!("byte {:02x}", b),
            });
        }
        n = n
            .checked_mul(100)
            .and_then(|n| n.checked_add(hi * 10 + lo))
            .ok_or_else(|| BridgeError::InvalidBcd {
                details: format!("{} bytes overflow", data.len()),
            })?;
    }
    Ok(n)
}

/// Encode `number` as exactly `width` Contact-ID digits (0x0A stands for 0).
pub fn contact_id_encode(number: u32, width: usize) -> Result<Vec<u8>> {
    let digits = number.to_string();
    if digits.len() > width {
        return Err(BridgeError::InvalidContactId {
            details: format!("{} has more than {} digits", number, width),
        });
    }
    let mut out = vec![0x0A; width - digits.len()];
    out.extend(digits.bytes().map(|d| match d - b'0' {
        0 => 0x0A,
        n => n,
    }));
    Ok(out)
}

pub fn contact_id_decode(data: &[u8]) -> Result<u32> {
    let mut n: u32 = 0;
    for &b in data {
        let digit = match b {
            0x0A => 0,
            0x01..=0x09 => b as u32,
            _ => {
                return Err(BridgeError::InvalidContactId {
                    details: format!("digit byte {:02x}", b),
                })
            }
        };
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(digit))
            .ok_or_else(|| BridgeError::InvalidContactId {
                details: format!("{} digits overflow", data.len()),
            })?;
    }
    Ok(n)
}

/// Space-separated lowercase hex, for logging frames.
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[0x74, 0x01, 0x35, 0x50, 0x26]), 201);
        assert_eq!(checksum(&[]), 0xFF);
    }

    #[test]
    fn test_checksum_appended_validates() {
        let samples: [&[u8]; 4] = [&[], &[0x00], &[0x74, 0x01, 0x35], &[0xFF; 40]];
        for frame in samples {
            let mut framed = frame.to_vec();
            framed.push(checksum(frame));
            assert_eq!(checksum(&framed), 0, "frame {}", hex_dump(frame));
        }
    }

    #[test]
    fn test_be16() {
        assert_eq!(be16_encode(0xF0F0), [0xF0, 0xF0]);
        assert_eq!(be16_decode(&[0x0B, 0x4A]).unwrap(), 0x0B4A);
        assert!(matches!(
            be16_decode(&[0x0B]),
            Err(BridgeError::Truncated { needed: 2, got: 1 })
        ));
    }

    #[test]
    fn test_bcd() {
        assert_eq!(to_bcd(89).unwrap(), 0x89);
        assert_eq!(to_bcd(0).unwrap(), 0x00);
        assert!(to_bcd(120).is_err());
        assert!(to_bcd(100).is_err());
        assert_eq!(from_bcd(&[0x89]).unwrap(), 89);
        assert_eq!(from_bcd(&[0x89, 0x01]).unwrap(), 8901);
        assert!(from_bcd(&[0xee]).is_err());
        assert!(from_bcd(&[0x1a]).is_err());
    }

    #[test]
    fn test_bcd_all_bytes() {
        for n in 0..=99 {
            assert_eq!(from_bcd(&[to_bcd(n).unwrap()]).unwrap(), n);
        }
    }

    #[test]
    fn test_contact_id_decode() {
        assert_eq!(contact_id_decode(&[0x01, 0x0a, 0x03]).unwrap(), 103);
        assert_eq!(contact_id_decode(&[0x0a, 0x0a, 0x03]).unwrap(), 3);
        assert!(contact_id_decode(&[0x0a, 0x0b, 0x03]).is_err());
        assert!(contact_id_decode(&[0x0a, 0x00, 0x03]).is_err());
        assert_eq!(contact_id_decode(&[]).unwrap(), 0);
    }

    #[test]
    fn test_contact_id_encode() {
        assert_eq!(contact_id_encode(103, 3).unwrap(), vec![0x01, 0x0a, 0x03]);
        assert_eq!(contact_id_encode(0, 4).unwrap(), vec![0x0a; 4]);
        assert!(contact_id_encode(12345, 4).is_err());
    }

    #[test]
    fn test_password_widths() {
        for (password, width) in [(0, 4), (1234, 4), (9999, 4), (7, 6), (123456, 6), (999999, 6)] {
            let encoded = contact_id_encode(password, width).unwrap();
            assert_eq!(encoded.len(), width);
            assert_eq!(contact_id_decode(&encoded).unwrap(), password);
        }
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x74, 0x01, 0x35, 0x50, 0x26]), "74 01 35 50 26");
        assert_eq!(hex_dump(&[0x74]), "74");
        assert_eq!(hex_dump(&[]), "");
    }
}
