//! Bridge configuration management.
//!
//! Configuration is layered with the `config` crate:
//! 1. Built-in defaults (every field has one)
//! 2. An optional TOML file
//! 3. Environment overrides such as `TAGBRIDGE__SERVER__PORT=9000`
//!
//! The defaults reproduce the behaviour of a stock ACR122U helper: WebSocket
//! on port 9876, tens-of-milliseconds APDU deadlines, AUTH0 = 0x04 and an
//! all-zero PACK when protection is enabled.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TAGBRIDGE_CONFIG";

/// Prefix for per-field environment overrides.
const ENV_PREFIX: &str = "TAGBRIDGE";

static PACK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{4}$").expect("PACK pattern is valid"));

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration problems: {}", .0.len(), .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket/HTTP listener.
    pub server: ServerConfig,
    /// Reader discovery.
    pub reader: ReaderConfig,
    /// Per-call deadlines.
    pub timeouts: TimeoutConfig,
    /// Password authentication transports.
    pub auth: AuthConfig,
    /// Values written when enabling password protection.
    pub protection: ProtectionConfig,
    /// Command queueing.
    pub bridge: QueueConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: String,
    /// TCP port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 9876,
        }
    }
}

/// Reader discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Only readers whose name contains this string are used (e.g. `ACR122`).
    pub name_filter: Option<String>,
    /// How long one PC/SC status-change wait may block.
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            name_filter: None,
            poll_interval_ms: 500,
        }
    }
}

impl ReaderConfig {
    /// Returns `true` if the reader name passes the configured filter.
    #[must_use]
    pub fn accepts(&self, reader_name: &str) -> bool {
        self.name_filter
            .as_deref()
            .map_or(true, |filter| reader_name.contains(filter))
    }
}

/// Deadlines for individual reader calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Single READ / GET_VERSION / GET UID exchange.
    pub apdu_ms: u64,
    /// Single page WRITE during multi-page writes.
    pub write_ms: u64,
    /// One password attempt on one transport.
    pub auth_attempt_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            apdu_ms: 50,
            write_ms: 80,
            auth_attempt_ms: 40,
        }
    }
}

impl TimeoutConfig {
    /// Deadline for a read-style APDU.
    #[must_use]
    pub const fn apdu(&self) -> Duration {
        Duration::from_millis(self.apdu_ms)
    }

    /// Deadline for a page write.
    #[must_use]
    pub const fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    /// Deadline for one authentication attempt.
    #[must_use]
    pub const fn auth_attempt(&self) -> Duration {
        Duration::from_millis(self.auth_attempt_ms)
    }
}

/// Authentication transport settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// First IOCTL code tried for the PN532 escape (pcsc-lite `SCARD_CTL_CODE(3500)`).
    pub ioctl_primary: u32,
    /// Second IOCTL code tried, the ACR122U escape as `0x310 << 16 | 0x40 << 2`.
    pub ioctl_secondary: u32,
    /// Accept a bare `90 00` answer as an unconfirmed success.
    pub accept_unconfirmed: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            ioctl_primary: 0x4200_0DAC,
            ioctl_secondary: 0x0310_0100,
            accept_unconfirmed: true,
        }
    }
}

/// Values written when protection is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// First protected page.
    pub auth0: u8,
    /// Password acknowledge, 2 bytes as 4 hex characters.
    pub pack: String,
    /// Set ACCESS.PROT so reads also need the password.
    pub read_protect: bool,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            auth0: 0x04,
            pack: "0000".to_string(),
            read_protect: false,
        }
    }
}

impl ProtectionConfig {
    /// The PACK page contents: two PACK bytes followed by two RFUI zero bytes.
    ///
    /// Falls back to all zeros when the configured value is not valid hex;
    /// [`BridgeConfig::validate`] rejects such values up front.
    #[must_use]
    pub fn pack_page(&self) -> [u8; 4] {
        let mut page = [0u8; 4];
        if let Ok(bytes) = hex::decode(&self.pack) {
            if bytes.len() == 2 {
                page[..2].copy_from_slice(&bytes);
            }
        }
        page
    }
}

/// Command queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Inputs a reader worker buffers before new commands are rejected as busy.
    pub command_queue_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            command_queue_depth: 8,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// A missing file is an error only when `path` is given explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `TAGBRIDGE_CONFIG`, else from the platform default path if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_default() -> ConfigResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| default_config_path().filter(|p| p.exists()));
        Self::load(path.as_deref())
    }

    /// Check every field and report all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for one problem and
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.server.bind_address.parse::<IpAddr>().is_err() {
            invalid("server.bind_address", "must be an IP address");
        }
        if self.server.port == 0 {
            invalid("server.port", "must be non-zero");
        }
        if self.reader.poll_interval_ms == 0 {
            invalid("reader.poll_interval_ms", "must be non-zero");
        }
        for (field, value) in [
            ("timeouts.apdu_ms", self.timeouts.apdu_ms),
            ("timeouts.write_ms", self.timeouts.write_ms),
            ("timeouts.auth_attempt_ms", self.timeouts.auth_attempt_ms),
        ] {
            if value == 0 || value > 5_000 {
                invalid(field, "must be between 1 and 5000 milliseconds");
            }
        }
        if self.auth.ioctl_primary == 0 || self.auth.ioctl_secondary == 0 {
            invalid("auth.ioctl_*", "IOCTL codes must be non-zero");
        }
        if self.protection.auth0 < 0x04 {
            invalid(
                "protection.auth0",
                "must be 0x04 or above so UID and capability pages stay readable",
            );
        }
        if !PACK_REGEX.is_match(&self.protection.pack) {
            invalid("protection.pack", "must be exactly 4 hex characters");
        }
        if self.bridge.command_queue_depth == 0 {
            invalid("bridge.command_queue_depth", "must be at least 1");
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// The platform default config file location.
///
/// On Linux: `/etc/tagbridge/config.toml`
/// Elsewhere: the user config directory, e.g. `~/Library/Application Support/tagbridge/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/etc/tagbridge/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "tagbridge")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 9876);
        assert_eq!(config.protection.auth0, 0x04);
        assert_eq!(config.protection.pack_page(), [0, 0, 0, 0]);
        assert_eq!(config.timeouts.auth_attempt(), Duration::from_millis(40));
        assert_eq!(config.auth.ioctl_primary, 0x4200_0DAC);
        assert_eq!(config.auth.ioctl_secondary, (0x310 << 16) | (0x40 << 2));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9900

[reader]
name_filter = "ACR122"

[protection]
auth0 = 16
pack = "BEEF"
"#
        )
        .unwrap();

        let config = BridgeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9900);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.reader.name_filter.as_deref(), Some("ACR122"));
        assert_eq!(config.protection.auth0, 16);
        assert_eq!(config.protection.pack_page(), [0xBE, 0xEF, 0x00, 0x00]);
        assert_eq!(config.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = BridgeConfig::default();
        config.protection.pack = "XYZ".to_string();
        match config.validate() {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "protection.pack");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_multiple_validation_errors() {
        let mut config = BridgeConfig::default();
        config.server.port = 0;
        config.timeouts.apdu_ms = 0;
        config.protection.auth0 = 0x02;
        config.bridge.command_queue_depth = 0;

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_reader_filter() {
        let mut reader = ReaderConfig::default();
        assert!(reader.accepts("Any Reader 00 00"));

        reader.name_filter = Some("ACR122".to_string());
        assert!(reader.accepts("ACS ACR122U PICC Interface 00 00"));
        assert!(!reader.accepts("Yubico YubiKey OTP+FIDO+CCID 00 00"));
    }

    #[test]
    fn test_config_error_converts_to_bridge_error() {
        let err = ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be non-zero".into(),
        };
        let bridge: crate::BridgeError = err.into();
        assert_eq!(bridge.error_code(), "CONFIG_ERROR");
    }
}
