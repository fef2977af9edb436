//! JSON messages exchanged with web clients.
//!
//! Every frame is one object with a `type` discriminator and camelCase
//! fields. Outbound frames carry an RFC 3339 `timestamp`; byte strings are
//! uppercase hex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{AuthSuccess, Confidence, PasswordFormat};
use crate::error::{BridgeError, Result};
use crate::layout::TagMemoryInfo;
use crate::ndef::{self, NdefContent, DEFAULT_LANGUAGE};
use crate::protection::ProtectionStatus;
use crate::session::{TagIdentity, TagStandard};

/// Welcome text sent to every new client.
pub const WELCOME_MESSAGE: &str = "Connected to ACR122U helper service";

/// Serde adapter for byte strings as uppercase hex.
pub mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as uppercase hex.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    /// Deserialize bytes from hex of either case.
    ///
    /// # Errors
    ///
    /// Fails on odd length or non-hex characters.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }

    /// The same for optional byte strings; `None` is `null`.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize optional bytes.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&hex::encode_upper(bytes)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize optional bytes.
        ///
        /// # Errors
        ///
        /// Fails on odd length or non-hex characters.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Try a password against the current tag.
    Authenticate {
        /// User-entered password.
        #[serde(default)]
        password: String,
    },
    /// Write a URI or Text record, optionally protecting the tag afterwards.
    Write(WriteRequest),
}

/// Body of a `write` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct WriteRequest {
    /// URI to store.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "https://t.example/TAG-001")]
    pub url: Option<String>,
    /// Text to store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Language tag for text, `en` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Password to protect the tag with after writing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// What a write command stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteContent {
    /// A URI record.
    Url(String),
    /// A Text record.
    Text {
        /// The text.
        text: String,
        /// IANA language tag.
        language: String,
    },
}

impl WriteContent {
    /// Encode as a single-record NDEF message.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidCommand`] for a Text language code
    /// longer than [`ndef::MAX_LANGUAGE_LEN`] bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Url(url) => Ok(ndef::encode_uri(url)),
            Self::Text { text, language } => ndef::encode_text(text, language),
        }
    }
}

/// A validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the authentication engine.
    Authenticate {
        /// Non-empty password.
        password: String,
    },
    /// Write NDEF, then optionally protect.
    Write {
        /// Record to write.
        content: WriteContent,
        /// Non-empty password, if protection was requested.
        password: Option<String>,
    },
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl InboundMessage {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidCommand`] for malformed JSON or an
    /// unknown `type`.
    pub fn parse(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|err| BridgeError::InvalidCommand(err.to_string()))
    }

    /// Validate into a [`Command`].
    ///
    /// Empty strings count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::EmptyPassword`] for an authenticate without
    /// a password and [`BridgeError::InvalidCommand`] for a write naming
    /// neither or both of `url` and `text`.
    pub fn into_command(self) -> Result<Command> {
        match self {
            Self::Authenticate { password } if password.is_empty() => {
                Err(BridgeError::EmptyPassword)
            }
            Self::Authenticate { password } => Ok(Command::Authenticate { password }),
            Self::Write(request) => {
                let content = match (non_empty(request.url), non_empty(request.text)) {
                    (Some(_), Some(_)) => {
                        return Err(BridgeError::InvalidCommand(
                            "Provide either a URL or text, not both".to_string(),
                        ))
                    }
                    (Some(url), None) => WriteContent::Url(url),
                    (None, Some(text)) => {
                        let language = non_empty(request.language)
                            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
                        if language.len() > ndef::MAX_LANGUAGE_LEN {
                            return Err(ndef::language_too_long(language.len()));
                        }
                        WriteContent::Text { text, language }
                    }
                    (None, None) => {
                        return Err(BridgeError::InvalidCommand(
                            "No URL or text provided".to_string(),
                        ))
                    }
                };
                Ok(Command::Write {
                    content,
                    password: non_empty(request.password),
                })
            }
        }
    }
}

impl Command {
    /// The result message reporting `err` for this command.
    #[must_use]
    pub fn failure(&self, err: &BridgeError, uid: Option<String>) -> OutboundMessage {
        match self {
            Self::Authenticate { .. } => OutboundMessage::AuthResult(AuthOutcome::failure(err, uid)),
            Self::Write { .. } => OutboundMessage::WriteResult(WriteOutcome::failure(err, uid)),
        }
    }
}

impl InboundMessage {
    /// The result message reporting `err` for this frame.
    #[must_use]
    pub fn failure(&self, err: &BridgeError) -> OutboundMessage {
        match self {
            Self::Authenticate { .. } => OutboundMessage::AuthResult(AuthOutcome::failure(err, None)),
            Self::Write(_) => OutboundMessage::WriteResult(WriteOutcome::failure(err, None)),
        }
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// A frame sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A reader was attached.
    ReaderConnected {
        /// PC/SC reader name.
        reader: String,
    },
    /// A reader was detached.
    ReaderDisconnected {
        /// PC/SC reader name.
        reader: String,
    },
    /// A tag was placed on the reader.
    TagDetected(TagSummary),
    /// The tag left the reader.
    TagRemoved {},
    /// Answer to `authenticate`.
    AuthResult(AuthOutcome),
    /// Answer to `write`.
    WriteResult(WriteOutcome),
    /// A reader failure or an unparseable frame.
    Error {
        /// Human-readable detail.
        message: String,
    },
    /// Informational notice.
    Status {
        /// Human-readable detail.
        message: String,
    },
}

impl OutboundMessage {
    /// An `error` frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The welcome `status` frame.
    #[must_use]
    pub fn welcome() -> Self {
        Self::Status {
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    /// Stamp with the current time.
    #[must_use]
    pub fn stamped(self) -> OutboundEvent {
        OutboundEvent::now(self)
    }
}

/// An outbound message with its send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OutboundEvent {
    /// The message.
    #[serde(flatten)]
    pub message: OutboundMessage,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl OutboundEvent {
    /// Stamp `message` with the current time.
    #[must_use]
    pub fn now(message: OutboundMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }

    /// Serialize as one JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Everything known about a freshly detected tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagSummary {
    /// UID as uppercase hex.
    #[schema(example = "04A1B2C3D4E580")]
    pub uid: String,
    /// ATR as uppercase hex.
    pub atr: String,
    /// Standard derived from the ATR.
    pub standard: TagStandard,
    /// Product and memory size.
    #[serde(flatten)]
    pub memory: TagMemoryInfo,
    /// Protection state.
    pub protection: ProtectionStatus,
    /// NDEF content.
    pub ndef: NdefContent,
}

impl TagSummary {
    /// Assemble a summary.
    #[must_use]
    pub fn new(
        identity: &TagIdentity,
        memory: TagMemoryInfo,
        protection: ProtectionStatus,
        ndef: NdefContent,
    ) -> Self {
        Self {
            uid: identity.uid_hex(),
            atr: hex::encode_upper(&identity.atr),
            standard: identity.standard,
            memory,
            protection,
            ndef,
        }
    }
}

/// Body of `auth_result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthOutcome {
    /// The tag accepted a password.
    pub success: bool,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Accepted password bytes as hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "FFFFFFFF")]
    pub password_bytes: Option<String>,
    /// Derivation that worked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<PasswordFormat>,
    /// Strength of the evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// UID of the tag the command ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl AuthOutcome {
    /// A successful authentication.
    #[must_use]
    pub fn success(success: &AuthSuccess, uid: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            password_bytes: Some(success.candidate.hex()),
            format: Some(success.candidate.format),
            confidence: Some(success.confidence),
            uid,
        }
    }

    /// A failed authentication.
    #[must_use]
    pub fn failure(err: &BridgeError, uid: Option<String>) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            password_bytes: None,
            format: None,
            confidence: None,
            uid,
        }
    }
}

/// Body of `write_result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    /// The NDEF message is on the tag.
    pub success: bool,
    /// Failure or caveat detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Password protection is fully enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_set: Option<bool>,
    /// The NDEF message was written, reported alongside password failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndef_written: Option<bool>,
    /// UID of the tag the command ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl WriteOutcome {
    /// NDEF written; `password_set` says whether protection was enabled.
    #[must_use]
    pub const fn written(password_set: bool, uid: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            password_set: Some(password_set),
            ndef_written: None,
            uid,
        }
    }

    /// NDEF and password written but AUTH0/ACCESS not set.
    #[must_use]
    pub fn with_caveat(caveat: &BridgeError, uid: Option<String>) -> Self {
        Self {
            success: true,
            error: Some(caveat.to_string()),
            password_set: Some(false),
            ndef_written: Some(true),
            uid,
        }
    }

    /// NDEF written but the password page write failed.
    #[must_use]
    pub fn password_failed(err: &BridgeError, uid: Option<String>) -> Self {
        Self {
            success: false,
            error: Some(format!("NDEF written but password setting failed: {err}")),
            password_set: Some(false),
            ndef_written: Some(true),
            uid,
        }
    }

    /// Nothing usable was written.
    #[must_use]
    pub fn failure(err: &BridgeError, uid: Option<String>) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            password_set: None,
            ndef_written: None,
            uid,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::auth::{AuthTransport, PasswordCandidate};

    #[test]
    fn test_parse_inbound() {
        let auth = InboundMessage::parse(r#"{"type":"authenticate","password":"FFFFFFFF"}"#).unwrap();
        assert_eq!(
            auth.into_command().unwrap(),
            Command::Authenticate {
                password: "FFFFFFFF".to_string()
            }
        );

        let write = InboundMessage::parse(
            r#"{"type":"write","url":"https://t.example/TAG-001","password":""}"#,
        )
        .unwrap();
        assert_eq!(
            write.into_command().unwrap(),
            Command::Write {
                content: WriteContent::Url("https://t.example/TAG-001".to_string()),
                password: None,
            }
        );

        let text = InboundMessage::parse(r#"{"type":"write","text":"hola","language":"es"}"#)
            .unwrap()
            .into_command()
            .unwrap();
        assert!(matches!(
            text,
            Command::Write { content: WriteContent::Text { ref language, .. }, .. } if language == "es"
        ));
    }

    #[test]
    fn test_invalid_inbound() {
        assert!(matches!(
            InboundMessage::parse("not json"),
            Err(BridgeError::InvalidCommand(_))
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type":"format_tag"}"#),
            Err(BridgeError::InvalidCommand(_))
        ));

        let empty = InboundMessage::parse(r#"{"type":"authenticate"}"#).unwrap();
        assert_eq!(empty.into_command(), Err(BridgeError::EmptyPassword));

        let neither = InboundMessage::parse(r#"{"type":"write","url":""}"#).unwrap();
        assert_eq!(
            neither.into_command(),
            Err(BridgeError::InvalidCommand("No URL or text provided".to_string()))
        );

        let both = InboundMessage::parse(r#"{"type":"write","url":"a","text":"b"}"#).unwrap();
        assert!(matches!(both.into_command(), Err(BridgeError::InvalidCommand(_))));
    }

    #[test]
    fn test_text_defaults_to_english() {
        let command = InboundMessage::Write(WriteRequest {
            text: Some("hi".to_string()),
            ..WriteRequest::default()
        })
        .into_command()
        .unwrap();
        let Command::Write { content, .. } = command else {
            panic!("expected write");
        };
        assert_eq!(content.encode(), ndef::encode_text("hi", "en"));
    }

    #[test]
    fn test_overlong_language_rejected() {
        let message = InboundMessage::parse(&format!(
            r#"{{"type":"write","text":"hi","language":"{}"}}"#,
            "x".repeat(64)
        ))
        .unwrap();
        let err = message.clone().into_command().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidCommand(_)));

        let OutboundMessage::WriteResult(outcome) = message.failure(&err) else {
            panic!("expected write_result");
        };
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Invalid command: Language code must be at most 63 bytes (got 64)")
        );

        let at_limit = InboundMessage::Write(WriteRequest {
            text: Some("hi".to_string()),
            language: Some("x".repeat(63)),
            ..WriteRequest::default()
        });
        assert!(at_limit.into_command().is_ok());
    }

    #[test]
    fn test_outbound_shape() {
        let event = OutboundMessage::ReaderConnected {
            reader: "ACS ACR122U".to_string(),
        }
        .stamped();
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "reader_connected");
        assert_eq!(value["reader"], "ACS ACR122U");
        let stamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());

        let removed = serde_json::to_value(OutboundMessage::TagRemoved {}).unwrap();
        assert_eq!(removed, json!({ "type": "tag_removed" }));
    }

    #[test]
    fn test_auth_result_shape() {
        let success = AuthSuccess {
            candidate: PasswordCandidate {
                bytes: [0xFF; 4],
                format: PasswordFormat::FactoryDefault,
            },
            transport: AuthTransport::EscapeApdu,
            confidence: Confidence::Confirmed,
        };
        let value = serde_json::to_value(OutboundMessage::AuthResult(AuthOutcome::success(
            &success,
            Some("04A1B2C3D4E580".to_string()),
        )))
        .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "auth_result",
                "success": true,
                "passwordBytes": "FFFFFFFF",
                "format": "factory-default",
                "confidence": "confirmed",
                "uid": "04A1B2C3D4E580",
            })
        );

        let failure = serde_json::to_value(AuthOutcome::failure(&BridgeError::NoReader, None)).unwrap();
        assert_eq!(failure, json!({ "success": false, "error": "No reader connected" }));
    }

    #[test]
    fn test_write_result_shapes() {
        let ok = serde_json::to_value(WriteOutcome::written(false, None)).unwrap();
        assert_eq!(ok, json!({ "success": true, "passwordSet": false }));

        let caveat = WriteOutcome::with_caveat(&BridgeError::ConfigReadError, None);
        assert!(caveat.success);
        assert_eq!(caveat.ndef_written, Some(true));
        assert_eq!(caveat.error.as_deref(), Some("Failed to read tag configuration"));

        let failed = WriteOutcome::password_failed(&BridgeError::TransportTimeout, None);
        assert!(!failed.success);
        assert!(failed
            .error
            .unwrap()
            .starts_with("NDEF written but password setting failed: "));
    }

    #[test]
    fn test_tag_summary_flattens_memory() {
        let identity = TagIdentity {
            uid: vec![0x04, 0xA1],
            atr: vec![0x3B, 0x8F],
            standard: TagStandard::Iso14443_3,
        };
        let summary = TagSummary::new(
            &identity,
            crate::layout::TagFamily::Ntag215.memory_info(),
            ProtectionStatus::unprotected(),
            NdefContent::default(),
        );
        let value = serde_json::to_value(OutboundMessage::TagDetected(summary)).unwrap();
        assert_eq!(value["type"], "tag_detected");
        assert_eq!(value["uid"], "04A1");
        assert_eq!(value["standard"], "TAG_ISO_14443_3");
        assert_eq!(value["tagType"], "NTAG215");
        assert_eq!(value["memorySize"], 540);
        assert_eq!(value["protection"]["isWritable"], true);
        assert_eq!(value["ndef"]["hasData"], false);
        assert_eq!(value["ndef"]["rawHex"], serde_json::Value::Null);
    }

    fn round_trip(message: OutboundMessage) -> (OutboundEvent, serde_json::Value) {
        let event = message.stamped();
        let text = event.to_json().unwrap();
        let back = OutboundEvent::from_json(&text).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.to_json().unwrap(), text);
        (back, serde_json::from_str(&text).unwrap())
    }

    #[test]
    fn test_tag_detected_round_trip() {
        let identity = TagIdentity {
            uid: vec![0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0x80],
            atr: vec![0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F],
            standard: TagStandard::Iso14443_3,
        };
        let summary = TagSummary::new(
            &identity,
            crate::layout::TagFamily::Ntag215.memory_info(),
            ProtectionStatus::from_config(&[0x04, 0, 0, 0x10, 0x00], false),
            NdefContent::from_message(ndef::encode_text("hola", "es").unwrap()),
        );

        let (back, value) = round_trip(OutboundMessage::TagDetected(summary.clone()));
        assert_eq!(back.message, OutboundMessage::TagDetected(summary));
        assert_eq!(value["uid"], "04A1B2C3D4E580");
        assert_eq!(value["atr"], "3B8F8001804F");
        assert_eq!(value["protection"]["auth0Page"], 0x10);
        assert_eq!(value["ndef"]["records"][0]["language"], "es");
        assert!(value["ndef"]["rawHex"].is_string());
    }

    #[test]
    fn test_write_result_round_trip() {
        let caveat = WriteOutcome::with_caveat(
            &BridgeError::ConfigReadError,
            Some("04A1B2C3D4E580".to_string()),
        );
        let (back, value) = round_trip(OutboundMessage::WriteResult(caveat));
        let OutboundMessage::WriteResult(outcome) = back.message else {
            panic!("expected write_result");
        };
        assert!(outcome.success);
        assert_eq!(outcome.password_set, Some(false));
        assert_eq!(outcome.ndef_written, Some(true));
        assert_eq!(outcome.error.as_deref(), Some("Failed to read tag configuration"));
        assert_eq!(value["ndefWritten"], true);

        let (back, value) = round_trip(OutboundMessage::WriteResult(WriteOutcome::written(true, None)));
        assert_eq!(
            back.message,
            OutboundMessage::WriteResult(WriteOutcome::written(true, None))
        );
        assert!(value.get("ndefWritten").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_auth_result_round_trip() {
        let success = AuthSuccess {
            candidate: PasswordCandidate {
                bytes: [0xCA, 0xFE, 0xBA, 0xBE],
                format: PasswordFormat::Hex,
            },
            transport: AuthTransport::IoctlSecondary,
            confidence: Confidence::Unconfirmed,
        };
        let outcome = AuthOutcome::success(&success, Some("04A1B2C3D4E580".to_string()));
        let (back, value) = round_trip(OutboundMessage::AuthResult(outcome.clone()));
        assert_eq!(back.message, OutboundMessage::AuthResult(outcome));
        assert_eq!(value["passwordBytes"], "CAFEBABE");

        let failure = AuthOutcome::failure(&BridgeError::NoReader, None);
        round_trip(OutboundMessage::AuthResult(failure));
        round_trip(OutboundMessage::TagRemoved {});
        round_trip(OutboundMessage::welcome());
    }

    #[test]
    fn test_hex_fields() {
        let content = NdefContent::from_message(ndef::encode_uri("https://a.b"));
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["rawHex"], "D101045504612E62");
        let back: NdefContent = serde_json::from_value(value).unwrap();
        assert_eq!(back, content);
    }
}
