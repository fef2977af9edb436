//! NTAG21x protection state: AUTH0, ACCESS and the static lock bytes.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::auth::{self, PasswordCandidate};
use crate::config::ProtectionConfig;
use crate::error::{BridgeError, Result};
use crate::layout::{Resolution, TagFamily};
use crate::session::Session;
use crate::transport::CardTransport;

/// AUTH0 value meaning "no page is protected".
pub const AUTH0_DISABLED: u8 = 0xFF;

/// ACCESS.PROT: reads need the password too.
pub const ACCESS_PROT: u8 = 0x80;

const STATIC_LOCK_PAGE: u8 = 2;
const CONFIG_LEN: u8 = 8;

/// Protection summary for one tag presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatus {
    /// AUTH0 points inside the tag.
    pub password_protected: bool,
    /// Writes are refused without further action.
    pub write_protected: bool,
    /// First protected page.
    pub auth0_page: u8,
    /// Neither locked nor password protected.
    pub is_writable: bool,
    /// Raw ACCESS byte.
    #[serde(skip)]
    pub access_byte: u8,
    /// Static lock bytes on page 2 are non-zero.
    #[serde(skip)]
    pub static_lock_set: bool,
    /// CFG0 page of the resolved layout.
    #[serde(skip)]
    pub config_page: Option<u8>,
    /// Resolved family.
    #[serde(skip)]
    pub family: Option<TagFamily>,
}

impl ProtectionStatus {
    /// An unprotected tag with no known layout.
    #[must_use]
    pub const fn unprotected() -> Self {
        Self {
            password_protected: false,
            write_protected: false,
            auth0_page: AUTH0_DISABLED,
            is_writable: true,
            access_byte: 0,
            static_lock_set: false,
            config_page: None,
            family: None,
        }
    }

    /// Classify a configuration window starting at CFG0.
    ///
    /// AUTH0 is byte 3 and ACCESS byte 4. A window shorter than 5 bytes
    /// reads as unprotected.
    #[must_use]
    pub fn from_config(window: &[u8], static_lock_set: bool) -> Self {
        let auth0 = window.get(3).copied().unwrap_or(AUTH0_DISABLED);
        let access = window.get(4).copied().unwrap_or(0);
        let password_protected = auth0 < AUTH0_DISABLED;
        let write_protected =
            static_lock_set || (password_protected && access & ACCESS_PROT != 0);
        Self {
            password_protected,
            write_protected,
            auth0_page: auth0,
            is_writable: !write_protected && !password_protected,
            access_byte: access,
            static_lock_set,
            config_page: None,
            family: None,
        }
    }

    /// A tag whose configuration pages refuse reads or read back as all
    /// zeros. Read protection is the usual cause, so the tag is treated as
    /// fully protected.
    #[must_use]
    pub const fn unreadable(static_lock_set: bool) -> Self {
        Self {
            password_protected: true,
            write_protected: true,
            auth0_page: 0,
            is_writable: false,
            access_byte: ACCESS_PROT,
            static_lock_set,
            config_page: None,
            family: None,
        }
    }
}

impl Default for ProtectionStatus {
    fn default() -> Self {
        Self::unprotected()
    }
}

/// Read the static lock bytes; an unreadable page 2 counts as unlocked.
async fn static_lock_set<T: CardTransport>(session: &Session<T>) -> bool {
    match session.read_pages(STATIC_LOCK_PAGE, 4).await {
        Ok(page) => page.get(2).is_some_and(|b| *b != 0) || page.get(3).is_some_and(|b| *b != 0),
        Err(err) => {
            debug!(error = %err, "Lock page unreadable");
            false
        }
    }
}

/// Work out the protection state of the tag in `session`.
pub async fn check_protection<T: CardTransport>(session: &Session<T>) -> ProtectionStatus {
    let Resolution::Resolved { layout, config, .. } = session.resolution() else {
        return ProtectionStatus::unprotected();
    };

    let locked = static_lock_set(session).await;
    let mut status = match config {
        Some(window) => ProtectionStatus::from_config(window, locked),
        None => ProtectionStatus::unreadable(locked),
    };
    status.config_page = Some(layout.config_page);
    status.family = Some(layout.family);
    debug!(
        uid = %session.identity().uid_hex(),
        auth0 = status.auth0_page,
        password_protected = status.password_protected,
        write_protected = status.write_protected,
        "Protection checked"
    );
    status
}

/// Result of [`enable_protection`] once the password page is on the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionOutcome {
    /// Password written to the PWD page.
    pub password: PasswordCandidate,
    /// Why AUTH0/ACCESS could not be set, if they could not.
    pub caveat: Option<BridgeError>,
}

impl ProtectionOutcome {
    /// AUTH0 and ACCESS were written too.
    #[must_use]
    pub const fn password_set(&self) -> bool {
        self.caveat.is_none()
    }
}

/// Write PWD, PACK, ACCESS and AUTH0.
///
/// ACCESS goes before AUTH0 so the second configuration write is not
/// itself behind the new password.
///
/// # Errors
///
/// Fails only when the password cannot be derived or the PWD page write
/// fails. Later failures are reported in [`ProtectionOutcome::caveat`].
pub async fn enable_protection<T: CardTransport>(
    session: &Session<T>,
    password: &str,
    config: &ProtectionConfig,
) -> Result<ProtectionOutcome> {
    let candidate = auth::primary_candidate(password)?;
    let layout = session.write_layout();
    let uid = session.identity().uid_hex();

    session
        .write_page(layout.password_page, &candidate.bytes)
        .await?;
    debug!(%uid, page = layout.password_page, format = %candidate.format, "Password page written");

    if let Err(err) = session
        .write_page(layout.pack_page, &config.pack_page())
        .await
    {
        warn!(%uid, page = layout.pack_page, error = %err, "PACK write failed, continuing");
    }

    let caveat = finish(session, layout.config_page, config).await.err();
    match &caveat {
        None => info!(%uid, auth0 = config.auth0, read_protect = config.read_protect, "Password protection enabled"),
        Some(err) => warn!(%uid, error = %err, "Password written but protection not enabled"),
    }
    Ok(ProtectionOutcome { password: candidate, caveat })
}

async fn finish<T: CardTransport>(
    session: &Session<T>,
    config_page: u8,
    config: &ProtectionConfig,
) -> Result<()> {
    let window = session
        .read_pages(config_page, CONFIG_LEN)
        .await
        .map_err(|_| BridgeError::ConfigReadError)?;
    if window.len() < usize::from(CONFIG_LEN) {
        return Err(BridgeError::ConfigReadError);
    }

    let mut cfg0 = [window[0], window[1], window[2], window[3]];
    let mut cfg1 = [window[4], window[5], window[6], window[7]];
    cfg0[3] = config.auth0;
    cfg1[0] = if config.read_protect { ACCESS_PROT } else { 0x00 };

    session.write_page(config_page + 1, &cfg1).await?;
    session.write_page(config_page, &cfg0).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::Authenticator;
    use crate::config::{AuthConfig, TimeoutConfig};
    use crate::layout;
    use crate::session::PresenceEpoch;
    use crate::transport::mock::MockTag;

    async fn open(tag: &MockTag) -> Session<MockTag> {
        let clock = PresenceEpoch::new();
        let epoch = clock.advance();
        let timeouts = TimeoutConfig::default();
        let mut session =
            Session::open(tag.clone(), tag.atr(), clock, epoch, timeouts).await;
        let known = layout::get_version(tag, timeouts.apdu())
            .await
            .and_then(|v| v.family().ok());
        session.set_layout(layout::resolve(tag, known, timeouts.apdu()).await);
        session
    }

    #[test]
    fn test_classification_rules() {
        let open = ProtectionStatus::from_config(&[0x04, 0, 0, 0xFF, 0x00], false);
        assert!(!open.password_protected);
        assert!(open.is_writable);

        let pwd = ProtectionStatus::from_config(&[0x04, 0, 0, 0x04, 0x00], false);
        assert!(pwd.password_protected);
        assert!(!pwd.write_protected);
        assert!(!pwd.is_writable);

        let read = ProtectionStatus::from_config(&[0x04, 0, 0, 0x10, 0x80], false);
        assert!(read.write_protected);
        assert_eq!(read.auth0_page, 0x10);

        // PROT without a protected page means nothing.
        let prot_only = ProtectionStatus::from_config(&[0x04, 0, 0, 0xFF, 0x80], false);
        assert!(!prot_only.write_protected);

        let locked = ProtectionStatus::from_config(&[0x04, 0, 0, 0xFF, 0x00], true);
        assert!(locked.write_protected);
        assert!(!locked.is_writable);
    }

    #[test]
    fn test_wire_fields() {
        let json = serde_json::to_value(ProtectionStatus::unprotected()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "passwordProtected": false,
                "writeProtected": false,
                "auth0Page": 255,
                "isWritable": true,
            })
        );
    }

    #[tokio::test]
    async fn test_check_factory_tag() {
        let tag = MockTag::new(TagFamily::Ntag215);
        let status = check_protection(&open(&tag).await).await;
        assert!(status.is_writable);
        assert_eq!(status.auth0_page, 0xFF);
        assert_eq!(status.config_page, Some(131));
        assert_eq!(status.family, Some(TagFamily::Ntag215));
    }

    #[tokio::test]
    async fn test_check_password_and_lock() {
        let tag = MockTag::new(TagFamily::Ntag213).with_password([1, 2, 3, 4], 0x04, false);
        let status = check_protection(&open(&tag).await).await;
        assert!(status.password_protected);
        assert!(!status.write_protected);
        assert_eq!(status.auth0_page, 4);

        let tag = MockTag::new(TagFamily::Ntag213).with_static_lock();
        let status = check_protection(&open(&tag).await).await;
        assert!(status.static_lock_set);
        assert!(status.write_protected);
    }

    #[tokio::test]
    async fn test_check_read_protected_tag() {
        let tag = MockTag::new(TagFamily::Ntag216).with_password([1, 2, 3, 4], 0x04, true);
        let session = open(&tag).await;
        assert!(matches!(
            session.resolution(),
            Resolution::Resolved { config: None, .. }
        ));

        let status = check_protection(&session).await;
        assert!(status.password_protected);
        assert!(status.write_protected);
        assert!(!status.is_writable);
    }

    #[tokio::test]
    async fn test_check_blank_config_is_unreadable() {
        let tag = MockTag::new(TagFamily::Ntag215).with_blank_config();
        let session = open(&tag).await;
        let status = check_protection(&session).await;
        assert_eq!(
            ProtectionStatus {
                config_page: None,
                family: None,
                ..status.clone()
            },
            ProtectionStatus::unreadable(false)
        );
        assert_eq!(status.config_page, Some(131));
        assert!(!status.is_writable);
    }

    #[tokio::test]
    async fn test_check_unresolved_layout() {
        let tag = MockTag::new(TagFamily::Ntag213).without_get_version();
        tag.fail_reads(true);
        let session = open(&tag).await;
        assert_eq!(session.resolution(), &Resolution::Unresolved);
        assert_eq!(check_protection(&session).await, ProtectionStatus::unprotected());
    }

    #[tokio::test]
    async fn test_enable_protection() {
        let tag = MockTag::new(TagFamily::Ntag213);
        let session = open(&tag).await;

        let outcome = enable_protection(&session, "secret", &ProtectionConfig::default())
            .await
            .unwrap();
        assert!(outcome.password_set());
        assert_eq!(outcome.password.bytes, *b"secr");
        assert_eq!(tag.password(), *b"secr");
        assert_eq!(tag.page(41)[3], 0x04);
        assert_eq!(tag.page(42)[0], 0x00);
        assert_eq!(tag.page(44), [0, 0, 0, 0]);
        assert_eq!(tag.written_pages(), vec![43, 44, 42, 41]);

        // Protected now, and the same password opens it.
        assert!(session.write_page(4, &[1, 1, 1, 1]).await.is_err());
        let auth = Authenticator::new(AuthConfig::default(), Duration::from_millis(40));
        assert!(auth.authenticate(&tag, "secret").await.is_ok());
        assert!(session.write_page(4, &[1, 1, 1, 1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_enable_read_protection_with_pack() {
        let tag = MockTag::new(TagFamily::Ntag215);
        let session = open(&tag).await;
        let config = ProtectionConfig {
            auth0: 0x10,
            pack: "BEEF".to_string(),
            read_protect: true,
        };

        let outcome = enable_protection(&session, "A1B2C3D4", &config).await.unwrap();
        assert!(outcome.password_set());
        assert_eq!(tag.password(), [0xA1, 0xB2, 0xC3, 0xD4]);
        assert_eq!(tag.page(134), [0xBE, 0xEF, 0x00, 0x00]);
        assert_eq!(tag.page(131)[3], 0x10);
        assert_eq!(tag.page(132)[0], ACCESS_PROT);
    }

    #[tokio::test]
    async fn test_password_page_failure_is_an_error() {
        let tag = MockTag::new(TagFamily::Ntag213);
        tag.fail_writes_at(43);
        let session = open(&tag).await;

        let result = enable_protection(&session, "secret", &ProtectionConfig::default()).await;
        assert!(matches!(result, Err(BridgeError::PageWriteError { page: 43, .. })));
        assert_eq!(tag.page(41)[3], 0xFF);
    }

    #[tokio::test]
    async fn test_pack_failure_is_not_fatal() {
        let tag = MockTag::new(TagFamily::Ntag213);
        tag.fail_writes_at(44);
        let session = open(&tag).await;

        let outcome = enable_protection(&session, "secret", &ProtectionConfig::default())
            .await
            .unwrap();
        assert!(outcome.password_set());
        assert_eq!(tag.page(41)[3], 0x04);
    }

    #[tokio::test]
    async fn test_late_failure_is_a_caveat() {
        let tag = MockTag::new(TagFamily::Ntag213);
        tag.fail_writes_at(41);
        let session = open(&tag).await;

        let outcome = enable_protection(&session, "secret", &ProtectionConfig::default())
            .await
            .unwrap();
        assert!(!outcome.password_set());
        assert!(matches!(
            outcome.caveat,
            Some(BridgeError::PageWriteError { page: 41, .. })
        ));
        assert_eq!(tag.password(), *b"secr");
    }

    #[tokio::test]
    async fn test_config_read_failure_is_a_caveat() {
        let tag = MockTag::new(TagFamily::Ntag213);
        let session = open(&tag).await;
        tag.fail_reads(true);

        let outcome = enable_protection(&session, "pw", &ProtectionConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome.caveat, Some(BridgeError::ConfigReadError));
        assert_eq!(tag.password(), [b'p', b'w', 0, 0]);
    }

    #[tokio::test]
    async fn test_empty_password_rejected() {
        let tag = MockTag::new(TagFamily::Ntag213);
        let session = open(&tag).await;
        assert_eq!(
            enable_protection(&session, "", &ProtectionConfig::default()).await,
            Err(BridgeError::EmptyPassword)
        );
        assert!(tag.written_pages().is_empty());
    }
}
