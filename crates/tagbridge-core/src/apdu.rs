//! Command encoder for Type-2 (Ultralight/NTAG) tags behind an ACR122U.
//!
//! The ACR122U exposes tag memory through PC/SC pseudo-APDUs (`CLA = FF`).
//! Memory is addressed in 4-byte pages. Password authentication has no
//! pseudo-APDU and is tunnelled to the reader's PN532 controller with
//! `InCommunicateThru`, either through `SCardControl` or wrapped in a
//! direct-transmit escape APDU.
//!
//! Everything here is pure: builders return bytes, parsers take bytes.

use crate::error::{BridgeError, Result};

/// Bytes per tag page.
pub const PAGE_SIZE: usize = 4;

/// Status word reported for a successful exchange.
pub const SW_SUCCESS: [u8; 2] = [0x90, 0x00];

/// `FF CA 00 00 00` - GET DATA (UID).
pub const GET_UID: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

/// GET_VERSION (`60`) sent through the direct-transmit escape.
pub const GET_VERSION: [u8; 7] = [0xFF, 0x00, 0x00, 0x00, 0x02, 0x60, 0x00];

/// PN532 `InCommunicateThru` command code (host to controller).
pub const PN532_IN_COMMUNICATE_THRU: [u8; 2] = [0xD4, 0x42];

/// PN532 `InCommunicateThru` response code (controller to host).
pub const PN532_IN_COMMUNICATE_THRU_RESPONSE: [u8; 2] = [0xD5, 0x43];

/// NTAG21x `PWD_AUTH` opcode.
pub const NTAG_PWD_AUTH: u8 = 0x1B;

/// A reader response split into body and status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response body without the status word.
    pub data: Vec<u8>,
    /// SW1 SW2, if the response was long enough to carry one.
    pub sw: Option<[u8; 2]>,
}

impl Response {
    /// Split raw reader bytes into body and trailing status word.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        if raw.len() < 2 {
            return Self {
                data: raw.to_vec(),
                sw: None,
            };
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Self {
            data: data.to_vec(),
            sw: Some([sw[0], sw[1]]),
        }
    }

    /// Returns `true` if the status word is `90 00`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.sw == Some(SW_SUCCESS)
    }
}

/// `FF B0 00 <page> <len>` - READ BINARY of `len` bytes from `page`.
#[must_use]
pub const fn read(page: u8, len: u8) -> [u8; 5] {
    [0xFF, 0xB0, 0x00, page, len]
}

/// `FF D6 00 <page> 04 <data>` - UPDATE BINARY of exactly one page.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidPageLength`] if `data` is not 4 bytes.
pub fn write(page: u8, data: &[u8]) -> Result<[u8; 9]> {
    let data: [u8; PAGE_SIZE] = data
        .try_into()
        .map_err(|_| BridgeError::InvalidPageLength { len: data.len() })?;
    Ok([
        0xFF, 0xD6, 0x00, page, 0x04, data[0], data[1], data[2], data[3],
    ])
}

/// PN532 `InCommunicateThru` frame carrying `PWD_AUTH <password>`.
#[must_use]
pub const fn pwd_auth(password: [u8; 4]) -> [u8; 7] {
    [
        PN532_IN_COMMUNICATE_THRU[0],
        PN532_IN_COMMUNICATE_THRU[1],
        NTAG_PWD_AUTH,
        password[0],
        password[1],
        password[2],
        password[3],
    ]
}

/// Wrap a PN532 frame in the ACR122U direct-transmit escape `FF 00 00 00 <len>`.
///
/// # Panics
///
/// Never for frames produced by this module; payloads longer than 255
/// bytes are truncated to the length byte's range by construction.
#[must_use]
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let len = u8::try_from(payload.len()).unwrap_or(u8::MAX);
    let mut apdu = Vec::with_capacity(5 + payload.len());
    apdu.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00, len]);
    apdu.extend_from_slice(&payload[..usize::from(len)]);
    apdu
}

/// Validate a READ response and return exactly `len` body bytes.
///
/// # Errors
///
/// Returns [`BridgeError::PageReadError`] when the status word is not
/// `90 00` or the body is shorter than requested.
pub fn parse_read(page: u8, len: u8, raw: &[u8]) -> Result<Vec<u8>> {
    let response = Response::parse(raw);
    if !response.is_success() || response.data.len() < usize::from(len) {
        return Err(BridgeError::PageReadError { page });
    }
    let mut data = response.data;
    data.truncate(usize::from(len));
    Ok(data)
}

/// Validate a WRITE response.
///
/// # Errors
///
/// Returns [`BridgeError::PageWriteError`] when the status word is not `90 00`.
pub fn parse_write(page: u8, raw: &[u8]) -> Result<()> {
    if Response::parse(raw).is_success() {
        Ok(())
    } else {
        let status = if raw.is_empty() {
            "no response".to_string()
        } else {
            hex::encode_upper(raw)
        };
        Err(BridgeError::PageWriteError { page, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_command() {
        assert_eq!(read(41, 16), [0xFF, 0xB0, 0x00, 0x29, 0x10]);
        assert_eq!(read(2, 4), [0xFF, 0xB0, 0x00, 0x02, 0x04]);
    }

    #[test]
    fn test_write_command() {
        let apdu = write(4, &[0x03, 0x0A, 0xD1, 0x01]).unwrap();
        assert_eq!(apdu, [0xFF, 0xD6, 0x00, 0x04, 0x04, 0x03, 0x0A, 0xD1, 0x01]);
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        assert_eq!(
            write(4, &[1, 2, 3]),
            Err(BridgeError::InvalidPageLength { len: 3 })
        );
        assert_eq!(
            write(4, &[1, 2, 3, 4, 5]),
            Err(BridgeError::InvalidPageLength { len: 5 })
        );
    }

    #[test]
    fn test_pwd_auth_frames() {
        let frame = pwd_auth([0x12, 0x34, 0x56, 0x78]);
        assert_eq!(frame, [0xD4, 0x42, 0x1B, 0x12, 0x34, 0x56, 0x78]);

        let apdu = escape(&frame);
        assert_eq!(
            apdu,
            vec![0xFF, 0x00, 0x00, 0x00, 0x07, 0xD4, 0x42, 0x1B, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn test_response_parse() {
        let response = Response::parse(&[0x01, 0x02, 0x90, 0x00]);
        assert_eq!(response.data, vec![0x01, 0x02]);
        assert!(response.is_success());

        let short = Response::parse(&[0x01]);
        assert_eq!(short.sw, None);
        assert!(!short.is_success());
    }

    #[test]
    fn test_parse_read_checks_status_and_length() {
        let mut raw = vec![0xAA; 16];
        raw.extend_from_slice(&SW_SUCCESS);
        assert_eq!(parse_read(4, 16, &raw).unwrap().len(), 16);
        assert_eq!(parse_read(4, 4, &raw).unwrap(), vec![0xAA; 4]);

        assert_eq!(
            parse_read(4, 16, &[0xAA, 0xAA, 0x90, 0x00]),
            Err(BridgeError::PageReadError { page: 4 })
        );
        assert_eq!(
            parse_read(200, 4, &[0x63, 0x00]),
            Err(BridgeError::PageReadError { page: 200 })
        );
    }

    #[test]
    fn test_parse_write_status() {
        assert!(parse_write(5, &[0x90, 0x00]).is_ok());
        assert_eq!(
            parse_write(5, &[0x63, 0x00]),
            Err(BridgeError::PageWriteError {
                page: 5,
                status: "6300".to_string()
            })
        );
    }
}
