//! Unified error types for the tagbridge core library.
//!
//! This module provides a unified error type [`BridgeError`] that covers all
//! failure modes of the reader bridge, from transport problems on the PC/SC
//! link up to protocol-level failures such as an exhausted password search.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide the operator toward resolution
//! - **Never fatal**: No variant ends a reader session; failures are reported
//!   inside the matching result event
//!
//! # Example
//!
//! ```rust
//! use tagbridge_core::error::{BridgeError, Result};
//!
//! fn require_four(data: &[u8]) -> Result<()> {
//!     if data.len() != 4 {
//!         return Err(BridgeError::InvalidPageLength { len: data.len() });
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all bridge operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// No reader is attached.
    #[error("No reader connected")]
    NoReader,

    /// A reader is attached but no tag is present on it.
    #[error("No tag present on reader")]
    NoTagPresent,

    /// The tag left the field while an operation was in flight.
    #[error("Tag was removed before the operation completed")]
    TagRemoved,

    /// The reader's command queue is full.
    #[error("Reader is busy; too many commands are queued")]
    Busy,

    // =========================================================================
    // COMMAND ERRORS
    // =========================================================================
    /// A page write was attempted with a payload that is not exactly one page.
    #[error("Page data must be exactly 4 bytes (got {len})")]
    InvalidPageLength {
        /// Length of the rejected payload.
        len: usize,
    },

    /// The reader answered a page write with a non-success status word.
    #[error("Write failed at page {page}: {status}")]
    PageWriteError {
        /// Page that could not be written.
        page: u8,
        /// Uppercase hex of the reader response.
        status: String,
    },

    /// A page read returned a failure status or a short body.
    #[error("Read failed at page {page}")]
    PageReadError {
        /// First page of the failed read.
        page: u8,
    },

    /// The configuration window could not be read while enabling protection.
    #[error("Failed to read tag configuration")]
    ConfigReadError,

    /// No candidate layout matched the tag.
    #[error("Could not detect the tag memory layout")]
    LayoutUnresolved,

    /// GET_VERSION answered with a product the bridge does not know.
    #[error("Unsupported tag family")]
    UnsupportedTagFamily,

    /// The encoded NDEF message does not fit in the tag's user area.
    #[error("NDEF message needs {needed} bytes but the tag only holds {capacity}")]
    NdefTooLarge {
        /// Bytes required, including TLV framing and padding.
        needed: usize,
        /// Bytes available in the user area.
        capacity: usize,
    },

    // =========================================================================
    // AUTHENTICATION ERRORS
    // =========================================================================
    /// No password was supplied.
    #[error("Password is required")]
    EmptyPassword,

    /// Every password candidate was rejected on every transport.
    #[error(
        "Authentication failed. Tried formats: {}. If you know the exact 4-byte hex password, \
         enter it as 8 hex characters (e.g., FFFFFFFF).",
        .formats_tried.join(", ")
    )]
    AuthenticationExhausted {
        /// Formats attempted, in order.
        formats_tried: Vec<String>,
    },

    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// An inbound command was malformed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// A reader call did not complete within its deadline.
    #[error("Reader did not respond in time")]
    TransportTimeout,

    /// The PC/SC layer reported a failure.
    #[error("Reader communication failed: {detail}")]
    TransportError {
        /// Description from the transport.
        detail: String,
    },
}

/// A specialized [`Result`] type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Shorthand for a [`BridgeError::TransportError`].
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::TransportError {
            detail: detail.into(),
        }
    }

    /// Returns `true` if this error came from the reader link itself.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::TransportTimeout | Self::TransportError { .. })
    }

    /// Returns `true` if this error reflects reader or tag presence.
    #[inline]
    #[must_use]
    pub const fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::NoReader | Self::NoTagPresent | Self::TagRemoved | Self::Busy
        )
    }

    /// Returns `true` if retrying the same operation may succeed without user changes.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportTimeout
                | Self::TransportError { .. }
                | Self::Busy
                | Self::PageReadError { .. }
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NoReader => "NO_READER",
            Self::NoTagPresent => "NO_TAG_PRESENT",
            Self::TagRemoved => "TAG_REMOVED",
            Self::Busy => "BUSY",
            Self::InvalidPageLength { .. } => "INVALID_PAGE_LENGTH",
            Self::PageWriteError { .. } => "PAGE_WRITE_ERROR",
            Self::PageReadError { .. } => "PAGE_READ_ERROR",
            Self::ConfigReadError => "CONFIG_READ_ERROR",
            Self::LayoutUnresolved => "LAYOUT_UNRESOLVED",
            Self::UnsupportedTagFamily => "UNSUPPORTED_TAG_FAMILY",
            Self::NdefTooLarge { .. } => "NDEF_TOO_LARGE",
            Self::EmptyPassword => "EMPTY_PASSWORD",
            Self::AuthenticationExhausted { .. } => "AUTHENTICATION_EXHAUSTED",
            Self::InvalidCommand(_) => "INVALID_COMMAND",
            Self::Config(_) => "CONFIG_ERROR",
            Self::TransportTimeout => "TRANSPORT_TIMEOUT",
            Self::TransportError { .. } => "TRANSPORT_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BridgeError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_classification() {
        assert!(BridgeError::TransportTimeout.is_transport_error());
        assert!(BridgeError::transport("card removed").is_transport_error());

        assert!(!BridgeError::NoReader.is_transport_error());
    }

    #[test]
    fn test_session_error_classification() {
        assert!(BridgeError::NoReader.is_session_error());
        assert!(BridgeError::NoTagPresent.is_session_error());
        assert!(BridgeError::TagRemoved.is_session_error());
        assert!(BridgeError::Busy.is_session_error());

        assert!(!BridgeError::ConfigReadError.is_session_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(BridgeError::TransportTimeout.is_recoverable());
        assert!(BridgeError::Busy.is_recoverable());
        assert!(!BridgeError::EmptyPassword.is_recoverable());
        assert!(!BridgeError::InvalidPageLength { len: 3 }.is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(BridgeError::NoReader.error_code(), "NO_READER");
        assert_eq!(
            BridgeError::PageWriteError {
                page: 4,
                status: "6300".into()
            }
            .error_code(),
            "PAGE_WRITE_ERROR"
        );
        assert_eq!(
            BridgeError::AuthenticationExhausted {
                formats_tried: vec![]
            }
            .error_code(),
            "AUTHENTICATION_EXHAUSTED"
        );
    }

    #[test]
    fn test_error_display_messages() {
        let err = BridgeError::PageWriteError {
            page: 7,
            status: "6300".into(),
        };
        assert_eq!(err.to_string(), "Write failed at page 7: 6300");

        let err = BridgeError::AuthenticationExhausted {
            formats_tried: vec!["hex".into(), "factory-default".into()],
        };
        assert!(err.to_string().contains("Tried formats: hex, factory-default."));

        assert_eq!(
            BridgeError::NoTagPresent.to_string(),
            "No tag present on reader"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BridgeError>();
        assert_sync::<BridgeError>();
    }
}
