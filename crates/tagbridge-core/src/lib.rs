//! # tagbridge-core
//!
//! Protocol core for the tagbridge NFC reader bridge.
//!
//! This crate provides:
//! - APDU construction for an ACR122U talking to NTAG21x tags
//! - NDEF URI/Text encoding and decoding inside a Type 2 TLV container
//! - Tag family detection and memory layout resolution
//! - Multi-format, multi-transport password authentication
//! - AUTH0/ACCESS protection inspection and setup
//! - A per-reader worker that serializes card events and client commands
//!
//! ## Architecture
//!
//! - [`apdu`] - Command encoder and response parsing
//! - [`ndef`] - NDEF records and TLV framing
//! - [`layout`] - Tag families, GET_VERSION and layout probing
//! - [`auth`] - Password candidates and the authentication retry plan
//! - [`protection`] - Protection status and password setup
//! - [`session`] - One tag presence and the presence epoch
//! - [`bridge`] - The reader worker
//! - [`registry`] - Attached readers and command routing
//! - [`messages`] - JSON wire messages
//! - [`transport`] - The [`CardTransport`] seam and a simulated tag
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod apdu;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod layout;
pub mod messages;
pub mod ndef;
pub mod protection;
pub mod registry;
pub mod session;
pub mod transport;

// Re-export primary types for convenience
pub use auth::{AuthSuccess, AuthTransport, Authenticator, Confidence, PasswordCandidate, PasswordFormat};
pub use bridge::{BridgeInput, ReaderWorker};
pub use config::{
    default_config_path, AuthConfig, BridgeConfig, ConfigError, ConfigResult, ProtectionConfig,
    QueueConfig, ReaderConfig, ServerConfig, TimeoutConfig,
};
pub use error::{BridgeError, Result};
pub use layout::{Resolution, TagFamily, TagLayout, TagMemoryInfo};
pub use messages::{
    AuthOutcome, Command, InboundMessage, OutboundEvent, OutboundMessage, TagSummary, WriteContent,
    WriteOutcome, WriteRequest,
};
pub use ndef::{NdefContent, NdefRecord, RecordType};
pub use protection::ProtectionStatus;
pub use registry::{ReaderLink, ReaderRegistry};
pub use session::{PresenceEpoch, Session, TagIdentity, TagStandard};
pub use transport::CardTransport;
#[cfg(any(test, feature = "mock-reader"))]
pub use transport::mock::MockTag;
