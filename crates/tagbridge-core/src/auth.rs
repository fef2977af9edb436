//! NTAG21x password authentication.
//!
//! Users type passwords as free text, but tags compare exactly four bytes.
//! Tags in the field were programmed by different tools with different
//! conventions, so authentication tries an ordered list of byte
//! derivations, each over every path the ACR122U offers for reaching the
//! PN532:
//!
//! 1. `SCardControl` with the primary IOCTL code
//! 2. `SCardControl` with the secondary IOCTL code
//! 3. the `FF 00 00 00` direct-transmit escape APDU
//!
//! The first confirmed (or, if allowed, unconfirmed) success wins.

use std::fmt;
use std::time::Duration;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::apdu::{self, PN532_IN_COMMUNICATE_THRU_RESPONSE, SW_SUCCESS};
use crate::config::AuthConfig;
use crate::error::{BridgeError, Result};
use crate::transport::CardTransport;

/// NTAG factory password.
pub const FACTORY_DEFAULT_PASSWORD: [u8; 4] = [0xFF; 4];

/// How a password string was turned into four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum PasswordFormat {
    /// Exactly eight hex digits.
    #[serde(rename = "hex")]
    Hex,
    /// Up to four bytes, zero padded.
    #[serde(rename = "ascii-padded")]
    AsciiPadded,
    /// The first four bytes.
    #[serde(rename = "first-4-ascii")]
    First4Ascii,
    /// The first four bytes of the MD5 digest.
    #[serde(rename = "md5-hash")]
    Md5Hash,
    /// `FF FF FF FF`.
    #[serde(rename = "factory-default")]
    FactoryDefault,
}

impl PasswordFormat {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::AsciiPadded => "ascii-padded",
            Self::First4Ascii => "first-4-ascii",
            Self::Md5Hash => "md5-hash",
            Self::FactoryDefault => "factory-default",
        }
    }
}

impl fmt::Display for PasswordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four password bytes and where they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordCandidate {
    /// Bytes sent with `PWD_AUTH`.
    pub bytes: [u8; 4],
    /// Derivation.
    pub format: PasswordFormat,
}

impl PasswordCandidate {
    const fn new(bytes: [u8; 4], format: PasswordFormat) -> Self {
        Self { bytes, format }
    }

    /// Bytes as uppercase hex.
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }
}

fn hex_candidate(password: &str) -> Option<PasswordCandidate> {
    if password.len() != 8 || !password.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(password, &mut bytes).ok()?;
    Some(PasswordCandidate::new(bytes, PasswordFormat::Hex))
}

fn padded_candidate(raw: &[u8]) -> PasswordCandidate {
    let mut bytes = [0u8; 4];
    let len = raw.len().min(4);
    bytes[..len].copy_from_slice(&raw[..len]);
    PasswordCandidate::new(bytes, PasswordFormat::AsciiPadded)
}

fn first_four_candidate(raw: &[u8]) -> PasswordCandidate {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&raw[..4]);
    PasswordCandidate::new(bytes, PasswordFormat::First4Ascii)
}

fn md5_candidate(raw: &[u8]) -> PasswordCandidate {
    let digest = Md5::digest(raw);
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&digest[..4]);
    PasswordCandidate::new(bytes, PasswordFormat::Md5Hash)
}

/// The derivation used when setting a password.
///
/// Eight hex digits are taken literally, short strings are zero padded,
/// and longer strings are cut to their first four bytes.
///
/// # Errors
///
/// Returns [`BridgeError::EmptyPassword`] for an empty string.
pub fn primary_candidate(password: &str) -> Result<PasswordCandidate> {
    if password.is_empty() {
        return Err(BridgeError::EmptyPassword);
    }
    let raw = password.as_bytes();
    Ok(hex_candidate(password).unwrap_or_else(|| {
        if raw.len() <= 4 {
            padded_candidate(raw)
        } else {
            first_four_candidate(raw)
        }
    }))
}

/// Every derivation worth trying for `password`, primary first and
/// factory default last.
///
/// # Errors
///
/// Returns [`BridgeError::EmptyPassword`] for an empty string.
pub fn derive_candidates(password: &str) -> Result<Vec<PasswordCandidate>> {
    let primary = primary_candidate(password)?;
    let raw = password.as_bytes();
    let mut candidates = vec![primary];
    let mut push = |candidate: PasswordCandidate| {
        if candidate.format != primary.format {
            candidates.push(candidate);
        }
    };

    if let Some(candidate) = hex_candidate(password) {
        push(candidate);
    }
    if raw.len() >= 4 {
        push(first_four_candidate(raw));
    }
    if raw.len() <= 4 {
        push(padded_candidate(raw));
    }
    if raw.len() > 4 {
        push(md5_candidate(raw));
    }
    push(PasswordCandidate::new(
        FACTORY_DEFAULT_PASSWORD,
        PasswordFormat::FactoryDefault,
    ));

    Ok(candidates)
}

/// Path used to reach the PN532.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthTransport {
    /// `SCardControl` with [`AuthConfig::ioctl_primary`].
    IoctlPrimary,
    /// `SCardControl` with [`AuthConfig::ioctl_secondary`].
    IoctlSecondary,
    /// `FF 00 00 00` escape through `SCardTransmit`.
    EscapeApdu,
}

impl AuthTransport {
    /// Order in which paths are tried for each candidate.
    pub const ORDER: [Self; 3] = [Self::IoctlPrimary, Self::IoctlSecondary, Self::EscapeApdu];
}

impl fmt::Display for AuthTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IoctlPrimary => "ioctl-primary",
            Self::IoctlSecondary => "ioctl-secondary",
            Self::EscapeApdu => "escape-apdu",
        })
    }
}

/// How sure we are that the tag accepted the password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The PN532 returned `D5 43 00` and the PACK.
    Confirmed,
    /// The reader only returned `90 00`.
    Unconfirmed,
}

/// Reading of a `PWD_AUTH` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReply {
    /// `D5 43 00 ...`.
    Confirmed,
    /// Exactly `90 00`.
    Unconfirmed,
    /// The tag refused the password.
    Nak,
    /// Anything else.
    Unrecognized,
}

/// Classify a raw `PWD_AUTH` reply.
#[must_use]
pub fn classify_reply(reply: &[u8]) -> AuthReply {
    const NAK: [u8; 3] = [
        PN532_IN_COMMUNICATE_THRU_RESPONSE[0],
        PN532_IN_COMMUNICATE_THRU_RESPONSE[1],
        0x01,
    ];

    if reply.starts_with(&PN532_IN_COMMUNICATE_THRU_RESPONSE) && reply.get(2) == Some(&0x00) {
        return AuthReply::Confirmed;
    }
    if reply == SW_SUCCESS {
        return AuthReply::Unconfirmed;
    }
    let short_nak = reply.len() >= 3 && reply.len() <= 5 && reply[reply.len() - 3] == 0x01;
    if reply.windows(3).any(|w| w == NAK) || reply == [0x01] || short_nak {
        return AuthReply::Nak;
    }
    AuthReply::Unrecognized
}

/// One step of the retry plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Password bytes.
    pub candidate: PasswordCandidate,
    /// Path.
    pub transport: AuthTransport,
}

/// Every (candidate, path) pair in order.
#[must_use]
pub fn attempt_plan(candidates: &[PasswordCandidate]) -> Vec<Attempt> {
    candidates
        .iter()
        .flat_map(|&candidate| {
            AuthTransport::ORDER
                .into_iter()
                .map(move |transport| Attempt {
                    candidate,
                    transport,
                })
        })
        .collect()
}

/// A successful authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSuccess {
    /// The password that worked.
    pub candidate: PasswordCandidate,
    /// The path that carried it.
    pub transport: AuthTransport,
    /// Strength of the evidence.
    pub confidence: Confidence,
}

/// Drives the attempt plan against a card.
#[derive(Debug, Clone, Copy)]
pub struct Authenticator {
    config: AuthConfig,
    attempt_timeout: Duration,
}

impl Authenticator {
    /// Create an authenticator.
    #[must_use]
    pub const fn new(config: AuthConfig, attempt_timeout: Duration) -> Self {
        Self {
            config,
            attempt_timeout,
        }
    }

    /// Try every candidate for `password` until the tag accepts one.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::EmptyPassword`] for an empty password and
    /// [`BridgeError::AuthenticationExhausted`] when every attempt was
    /// refused. Transport failures only end the attempt they occurred in.
    pub async fn authenticate<T: CardTransport>(
        &self,
        transport: &T,
        password: &str,
    ) -> Result<AuthSuccess> {
        let candidates = derive_candidates(password)?;
        let plan = attempt_plan(&candidates);
        debug!(candidates = candidates.len(), attempts = plan.len(), "Starting authentication");

        for attempt in plan {
            let reply = self.send(transport, attempt).await;
            let class = match &reply {
                Ok(raw) => classify_reply(raw),
                Err(_) => AuthReply::Nak,
            };
            debug!(
                format = %attempt.candidate.format,
                transport = %attempt.transport,
                reply = %reply.as_ref().map_or_else(ToString::to_string, hex::encode_upper),
                ?class,
                "Authentication attempt"
            );

            let confidence = match class {
                AuthReply::Confirmed => Confidence::Confirmed,
                AuthReply::Unconfirmed if self.config.accept_unconfirmed => Confidence::Unconfirmed,
                _ => continue,
            };
            info!(
                format = %attempt.candidate.format,
                transport = %attempt.transport,
                ?confidence,
                "Authentication succeeded"
            );
            return Ok(AuthSuccess {
                candidate: attempt.candidate,
                transport: attempt.transport,
                confidence,
            });
        }

        let formats_tried: Vec<String> = candidates
            .iter()
            .map(|candidate| candidate.format.to_string())
            .collect();
        warn!(formats = ?formats_tried, "Authentication failed with every format");
        Err(BridgeError::AuthenticationExhausted { formats_tried })
    }

    async fn send<T: CardTransport>(&self, transport: &T, attempt: Attempt) -> Result<Vec<u8>> {
        let frame = apdu::pwd_auth(attempt.candidate.bytes);
        match attempt.transport {
            AuthTransport::IoctlPrimary => {
                transport
                    .control(self.config.ioctl_primary, &frame, self.attempt_timeout)
                    .await
            }
            AuthTransport::IoctlSecondary => {
                transport
                    .control(self.config.ioctl_secondary, &frame, self.attempt_timeout)
                    .await
            }
            AuthTransport::EscapeApdu => {
                transport
                    .transmit(&apdu::escape(&frame), self.attempt_timeout)
                    .await
            }
        }
    }
}
