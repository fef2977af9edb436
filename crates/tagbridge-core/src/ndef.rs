//! NDEF record codec and the Type-2 TLV container.
//!
//! Tags store NDEF messages inside a TLV area that begins at page 4:
//!
//! ```text
//! 03 <len>            NDEF message TLV (len < 255)
//! 03 FF <hi> <lo>     NDEF message TLV (3-byte length form)
//! <message bytes>
//! FE                  terminator TLV
//! ```
//!
//! Encoding only produces single-record messages (one URI or one Text
//! record). Decoding is tolerant: truncated or malformed input yields the
//! records that were complete before the damage.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::apdu::PAGE_SIZE;
use crate::error::{BridgeError, Result};
use crate::messages::hex_serde;

/// URI identifier codes (NFC Forum URI RTD). Index is the prefix code.
pub const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

/// Prefix codes considered when abbreviating a URI on write.
const ENCODE_PREFIX_COUNT: usize = 30;

/// Language tag used for Text records when none is given.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Longest language code the Text status byte can describe.
pub const MAX_LANGUAGE_LEN: usize = 0x3F;

/// First page of the user data area on Type-2 tags.
pub const USER_DATA_START_PAGE: u8 = 4;

/// NULL TLV.
pub const TLV_NULL: u8 = 0x00;
/// NDEF message TLV.
pub const TLV_NDEF: u8 = 0x03;
/// Terminator TLV.
pub const TLV_TERMINATOR: u8 = 0xFE;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// NFC Forum well-known type.
pub const TNF_WELL_KNOWN: u8 = 0x01;
/// RFC 2046 media type.
pub const TNF_MIME: u8 = 0x02;
/// NFC Forum external type.
pub const TNF_EXTERNAL: u8 = 0x04;

const RTD_TEXT: &[u8] = b"T";
const RTD_URI: &[u8] = b"U";
const RTD_SMART_POSTER: &[u8] = b"Sp";

/// What a decoded record turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Well-known `U`.
    Uri,
    /// Well-known `T`.
    Text,
    /// Well-known `Sp`.
    SmartPoster,
    /// TNF 2.
    Mime,
    /// TNF 4.
    External,
    /// Anything else.
    Unknown,
}

/// A single decoded NDEF record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NdefRecord {
    /// Type name format, 0..=7.
    pub tnf: u8,
    /// Record type field.
    #[serde(with = "hex_serde")]
    #[schema(value_type = String, example = "55")]
    pub type_bytes: Vec<u8>,
    /// Record ID field (empty when IL is clear).
    #[serde(with = "hex_serde")]
    #[schema(value_type = String, example = "55")]
    pub id_bytes: Vec<u8>,
    /// Raw payload.
    #[serde(with = "hex_serde")]
    #[schema(value_type = String, example = "55")]
    pub payload: Vec<u8>,
    /// Classification.
    pub record_type: RecordType,
    /// Decoded text for Text records and `text/*` MIME records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Expanded URI for URI records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Language tag for Text records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Media type for MIME records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// NDEF content found on a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NdefContent {
    /// A non-empty NDEF message TLV was found.
    pub has_data: bool,
    /// Records decoded from the message.
    pub records: Vec<NdefRecord>,
    /// The NDEF TLV value, absent when the tag holds no message.
    #[serde(rename = "rawHex", default, with = "hex_serde::option")]
    #[schema(value_type = Option<String>)]
    pub raw: Option<Vec<u8>>,
}

impl NdefContent {
    /// Build content from an NDEF TLV value.
    #[must_use]
    pub fn from_message(raw: Vec<u8>) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        Self {
            has_data: true,
            records: decode_message(&raw),
            raw: Some(raw),
        }
    }
}

// =============================================================================
// ENCODING
// =============================================================================

/// Encode a single well-known record with MB and ME set.
///
/// Payloads under 256 bytes use the short-record form.
#[must_use]
pub fn encode_record(tnf: u8, record_type: &[u8], payload: &[u8]) -> Vec<u8> {
    let short = payload.len() < 256;
    let mut header = FLAG_MB | FLAG_ME | (tnf & TNF_MASK);
    if short {
        header |= FLAG_SR;
    }

    let mut record = Vec::with_capacity(6 + record_type.len() + payload.len());
    record.push(header);
    record.push(u8::try_from(record_type.len()).unwrap_or(u8::MAX));
    if short {
        record.push(payload.len() as u8);
    } else {
        let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        record.extend_from_slice(&len.to_be_bytes());
    }
    record.extend_from_slice(record_type);
    record.extend_from_slice(payload);
    record
}

/// Pick the abbreviation for a URI: the longest matching prefix wins.
#[must_use]
pub fn uri_prefix_code(uri: &str) -> (u8, &str) {
    URI_PREFIXES[..ENCODE_PREFIX_COUNT]
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, prefix)| uri.starts_with(*prefix))
        .max_by_key(|(_, prefix)| prefix.len())
        .map_or((0, uri), |(code, prefix)| {
            (code as u8, &uri[prefix.len()..])
        })
}

/// Encode a one-record message holding a URI record.
#[must_use]
pub fn encode_uri(uri: &str) -> Vec<u8> {
    let (code, rest) = uri_prefix_code(uri);
    let mut payload = Vec::with_capacity(1 + rest.len());
    payload.push(code);
    payload.extend_from_slice(rest.as_bytes());
    encode_record(TNF_WELL_KNOWN, RTD_URI, &payload)
}

/// Encode a one-record message holding a UTF-8 Text record.
///
/// An empty `language` falls back to [`DEFAULT_LANGUAGE`].
///
/// # Errors
///
/// Returns [`BridgeError::InvalidCommand`] if the language code is longer
/// than [`MAX_LANGUAGE_LEN`] bytes.
pub fn encode_text(text: &str, language: &str) -> Result<Vec<u8>> {
    let language = if language.is_empty() {
        DEFAULT_LANGUAGE
    } else {
        language
    };
    let lang = language.as_bytes();
    let status = u8::try_from(lang.len())
        .ok()
        .filter(|&len| usize::from(len) <= MAX_LANGUAGE_LEN)
        .ok_or_else(|| language_too_long(lang.len()))?;

    let mut payload = Vec::with_capacity(1 + lang.len() + text.len());
    payload.push(status);
    payload.extend_from_slice(lang);
    payload.extend_from_slice(text.as_bytes());
    Ok(encode_record(TNF_WELL_KNOWN, RTD_TEXT, &payload))
}

/// The error for a language code that does not fit the status byte.
#[must_use]
pub fn language_too_long(len: usize) -> BridgeError {
    BridgeError::InvalidCommand(format!(
        "Language code must be at most {MAX_LANGUAGE_LEN} bytes (got {len})"
    ))
}

/// Frame a message as `03 len ... FE` without padding.
///
/// # Errors
///
/// Returns [`BridgeError::NdefTooLarge`] if the message exceeds the
/// 16-bit TLV length field.
pub fn tlv_frame(message: &[u8]) -> Result<Vec<u8>> {
    let len = message.len();
    let mut tlv = Vec::with_capacity(len + 5);
    tlv.push(TLV_NDEF);
    if len < 0xFF {
        tlv.push(len as u8);
    } else {
        let len = u16::try_from(len).map_err(|_| BridgeError::NdefTooLarge {
            needed: len + 5,
            capacity: usize::from(u16::MAX),
        })?;
        tlv.push(0xFF);
        tlv.extend_from_slice(&len.to_be_bytes());
    }
    tlv.extend_from_slice(message);
    tlv.push(TLV_TERMINATOR);
    Ok(tlv)
}

/// Frame a message and zero-pad it to a whole number of pages.
///
/// # Errors
///
/// See [`tlv_frame`].
pub fn wrap_tlv(message: &[u8]) -> Result<Vec<u8>> {
    let mut tlv = tlv_frame(message)?;
    let padded = tlv.len().div_ceil(PAGE_SIZE) * PAGE_SIZE;
    tlv.resize(padded, 0x00);
    Ok(tlv)
}

/// Split padded TLV bytes into `(page, data)` writes starting at page 4.
#[must_use]
pub fn page_writes(tlv: &[u8]) -> Vec<(u8, [u8; PAGE_SIZE])> {
    tlv.chunks(PAGE_SIZE)
        .zip(USER_DATA_START_PAGE..)
        .map(|(chunk, page)| {
            let mut data = [0u8; PAGE_SIZE];
            data[..chunk.len()].copy_from_slice(chunk);
            (page, data)
        })
        .collect()
}

// =============================================================================
// TLV SCAN
// =============================================================================

/// Outcome of scanning a (possibly partial) TLV area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvScan {
    /// The NDEF message TLV was found complete.
    Found(Vec<u8>),
    /// A NULL or terminator TLV ended the area before any NDEF TLV.
    Absent,
    /// More bytes are needed to finish the scan.
    Incomplete,
}

/// Walk TLV blocks looking for the NDEF message.
///
/// Stops at a NULL or terminator byte. Lock control, memory control and
/// proprietary TLVs are skipped using their length.
#[must_use]
pub fn scan_tlv(area: &[u8]) -> TlvScan {
    let mut offset = 0;
    loop {
        let Some(&tag) = area.get(offset) else {
            return TlvScan::Incomplete;
        };
        if tag == TLV_NULL || tag == TLV_TERMINATOR {
            return TlvScan::Absent;
        }

        let Some(&first) = area.get(offset + 1) else {
            return TlvScan::Incomplete;
        };
        let (len, header) = if first == 0xFF {
            match area.get(offset + 2..offset + 4) {
                Some(bytes) => (usize::from(u16::from_be_bytes([bytes[0], bytes[1]])), 4),
                None => return TlvScan::Incomplete,
            }
        } else {
            (usize::from(first), 2)
        };

        let start = offset + header;
        let end = start + len;
        if tag == TLV_NDEF {
            return area
                .get(start..end)
                .map_or(TlvScan::Incomplete, |value| TlvScan::Found(value.to_vec()));
        }
        offset = end;
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// Decode the records of an NDEF message.
///
/// Decoding stops at a `00`/`FE` header byte, after a record with ME set,
/// or when a record runs past the end of `data`.
#[must_use]
pub fn decode_message(data: &[u8]) -> Vec<NdefRecord> {
    let mut records = Vec::new();
    let mut offset = 0;

    while let Some(&header) = data.get(offset) {
        if header == TLV_NULL || header == TLV_TERMINATOR {
            break;
        }
        let Some((record, next)) = decode_record(data, offset) else {
            break;
        };
        records.push(record);
        offset = next;
        if header & FLAG_ME != 0 {
            break;
        }
    }

    records
}

/// Decode one record at `offset`, returning it and the offset after it.
fn decode_record(data: &[u8], offset: usize) -> Option<(NdefRecord, usize)> {
    let header = *data.get(offset)?;
    let tnf = header & TNF_MASK;
    let mut cursor = offset + 1;

    let type_len = usize::from(*data.get(cursor)?);
    cursor += 1;

    let payload_len = if header & FLAG_SR != 0 {
        let len = usize::from(*data.get(cursor)?);
        cursor += 1;
        len
    } else {
        let bytes = data.get(cursor..cursor + 4)?;
        cursor += 4;
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
    };

    let id_len = if header & FLAG_IL != 0 {
        let len = usize::from(*data.get(cursor)?);
        cursor += 1;
        len
    } else {
        0
    };

    let type_bytes = data.get(cursor..cursor + type_len)?.to_vec();
    cursor += type_len;
    let id_bytes = data.get(cursor..cursor + id_len)?.to_vec();
    cursor += id_len;
    let payload = data.get(cursor..cursor.checked_add(payload_len)?)?.to_vec();
    cursor += payload_len;

    let mut record = NdefRecord {
        tnf,
        type_bytes,
        id_bytes,
        payload,
        record_type: RecordType::Unknown,
        text: None,
        url: None,
        language: None,
        mime_type: None,
    };
    classify(&mut record);
    Some((record, cursor))
}

fn classify(record: &mut NdefRecord) {
    match record.tnf {
        TNF_WELL_KNOWN => match record.type_bytes.as_slice() {
            RTD_TEXT => {
                record.record_type = RecordType::Text;
                if let Some((language, text)) = decode_text_payload(&record.payload) {
                    record.language = Some(language);
                    record.text = Some(text);
                }
            }
            RTD_URI => {
                record.record_type = RecordType::Uri;
                record.url = decode_uri_payload(&record.payload);
            }
            RTD_SMART_POSTER => record.record_type = RecordType::SmartPoster,
            _ => {}
        },
        TNF_MIME => {
            let mime_type = String::from_utf8_lossy(&record.type_bytes).into_owned();
            if mime_type.starts_with("text/") {
                record.text = Some(String::from_utf8_lossy(&record.payload).into_owned());
            }
            record.record_type = RecordType::Mime;
            record.mime_type = Some(mime_type);
        }
        TNF_EXTERNAL => record.record_type = RecordType::External,
        _ => {}
    }
}

/// Split a Text payload into `(language, text)`.
fn decode_text_payload(payload: &[u8]) -> Option<(String, String)> {
    let status = *payload.first()?;
    let lang_len = usize::from(status & 0x3F);
    let language = payload.get(1..1 + lang_len)?;
    let body = &payload[1 + lang_len..];

    let text = if status & 0x80 == 0 {
        String::from_utf8_lossy(body).into_owned()
    } else {
        decode_utf16(body)
    };
    Some((String::from_utf8_lossy(language).into_owned(), text))
}

/// UTF-16 with an optional BOM; little endian when there is none.
fn decode_utf16(body: &[u8]) -> String {
    let (big_endian, body) = match body {
        [0xFE, 0xFF, rest @ ..] => (true, rest),
        [0xFF, 0xFE, rest @ ..] => (false, rest),
        _ => (false, body),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_uri_payload(payload: &[u8]) -> Option<String> {
    let (&code, rest) = payload.split_first()?;
    let prefix = URI_PREFIXES.get(usize::from(code)).copied().unwrap_or("");
    Some(format!("{prefix}{}", String::from_utf8_lossy(rest)))
}
