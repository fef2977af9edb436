//! A simulated NTAG21x behind an ACR122U.
//!
//! The mock keeps real page memory and enforces the parts of the NTAG
//! access rules the bridge depends on: AUTH0/ACCESS password protection,
//! static lock bytes and write-only PWD/PACK pages. Every APDU and control
//! request is logged so tests can assert on the exact command sequence.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::apdu::{NTAG_PWD_AUTH, PAGE_SIZE, PN532_IN_COMMUNICATE_THRU};
use crate::error::{BridgeError, Result};
use crate::layout::{TagFamily, TagLayout};
use crate::session::PresenceEpoch;
use crate::transport::CardTransport;

const SW_OK: [u8; 2] = [0x90, 0x00];
const SW_FAIL: [u8; 2] = [0x63, 0x00];
const SW_UNSUPPORTED: [u8; 2] = [0x6A, 0x81];

/// ATR of an NTAG21x on an ACR122U.
pub const NTAG_ATR: [u8; 20] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x03,
    0x00, 0x00, 0x00, 0x00, 0x68,
];

/// How the simulated reader reports a `PWD_AUTH` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReply {
    /// Full PN532 frames: `D5 43 00 <PACK>` on ACK, `D5 43 01` on NAK.
    Pn532,
    /// Status word only: `90 00` on ACK, `63 00` on NAK.
    StatusOnly,
    /// `90 00` whatever the tag said.
    AlwaysOk,
}

struct Removal {
    after_writes: usize,
    clock: PresenceEpoch,
}

struct MockState {
    family: TagFamily,
    get_version: bool,
    uid: Vec<u8>,
    pages: Vec<[u8; PAGE_SIZE]>,
    password: [u8; 4],
    authenticated: bool,
    auth_reply: AuthReply,
    ioctl_codes: Vec<u32>,
    stalled_ioctl: Vec<u32>,
    stalled_escape: bool,
    fail_reads: bool,
    failing_writes: HashSet<u8>,
    latency: Option<Duration>,
    removal: Option<Removal>,
    successful_writes: usize,
    removed: bool,
    transmitted: Vec<Vec<u8>>,
    controls: Vec<(u32, Vec<u8>)>,
}

// UID bytes and their BCC checks as an NTAG21x stores them.
fn stamp_uid(pages: &mut [[u8; PAGE_SIZE]], uid: [u8; 7]) {
    pages[0] = [uid[0], uid[1], uid[2], 0x88 ^ uid[0] ^ uid[1] ^ uid[2]];
    pages[1] = [uid[3], uid[4], uid[5], uid[6]];
    pages[2][0] = uid[3] ^ uid[4] ^ uid[5] ^ uid[6];
}

/// A simulated tag. Clones share state.
#[derive(Clone)]
pub struct MockTag {
    state: Arc<Mutex<MockState>>,
}

impl MockTag {
    /// A blank, unprotected tag of `family` with factory configuration.
    #[must_use]
    pub fn new(family: TagFamily) -> Self {
        let layout = TagLayout::for_family(family);
        let uid = [0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0x80];
        let mut pages = vec![[0u8; PAGE_SIZE]; usize::from(layout.max_page) + 1];

        stamp_uid(&mut pages, uid);
        pages[2][1] = 0x48;
        pages[3] = [0xE1, 0x10, (layout.user_capacity() / 8) as u8, 0x00];
        let cfg = usize::from(layout.config_page);
        pages[cfg] = [0x04, 0x00, 0x00, 0xFF];
        pages[cfg + 1] = [0x00, 0x05, 0x00, 0x00];

        Self {
            state: Arc::new(Mutex::new(MockState {
                family,
                get_version: true,
                uid: uid.to_vec(),
                pages,
                password: [0xFF; 4],
                authenticated: false,
                auth_reply: AuthReply::Pn532,
                ioctl_codes: Vec::new(),
                stalled_ioctl: Vec::new(),
                stalled_escape: false,
                fail_reads: false,
                failing_writes: HashSet::new(),
                latency: None,
                removal: None,
                successful_writes: 0,
                removed: false,
                transmitted: Vec::new(),
                controls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replace the seven byte UID, including its copy in pages 0 to 2.
    #[must_use]
    pub fn with_uid(self, uid: [u8; 7]) -> Self {
        {
            let mut state = self.lock();
            stamp_uid(&mut state.pages, uid);
            state.uid = uid.to_vec();
        }
        self
    }

    /// Answer GET_VERSION with an error, forcing layout probing.
    #[must_use]
    pub fn without_get_version(self) -> Self {
        self.lock().get_version = false;
        self
    }

    /// Choose how `PWD_AUTH` replies look.
    #[must_use]
    pub fn with_auth_reply(self, reply: AuthReply) -> Self {
        self.lock().auth_reply = reply;
        self
    }

    /// Accept `SCardControl` on `code`. No codes are accepted by default.
    #[must_use]
    pub fn with_ioctl(self, code: u32) -> Self {
        self.lock().ioctl_codes.push(code);
        self
    }

    /// Never answer `SCardControl` on `code`; callers hit their deadline.
    #[must_use]
    pub fn with_stalled_ioctl(self, code: u32) -> Self {
        self.lock().stalled_ioctl.push(code);
        self
    }

    /// Never answer escape (`FF 00 00 00`) APDUs; callers hit their deadline.
    #[must_use]
    pub fn with_stalled_escape(self) -> Self {
        self.lock().stalled_escape = true;
        self
    }

    /// Delay every exchange.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    /// Protect the tag as if it had been configured by a reader.
    #[must_use]
    pub fn with_password(self, password: [u8; 4], auth0: u8, read_protect: bool) -> Self {
        {
            let mut state = self.lock();
            let cfg = usize::from(state.family.config_page());
            state.password = password;
            state.pages[cfg + 2] = password;
            state.pages[cfg][3] = auth0;
            state.pages[cfg + 1][0] = if read_protect { 0x80 } else { 0x00 };
        }
        self
    }

    /// Zero the whole configuration area (CFG0, CFG1, PWD, PACK).
    #[must_use]
    pub fn with_blank_config(self) -> Self {
        {
            let mut state = self.lock();
            let cfg = state.config_page();
            for page in &mut state.pages[cfg..cfg + 4] {
                *page = [0; PAGE_SIZE];
            }
        }
        self
    }

    /// Set the static lock bytes on page 2.
    #[must_use]
    pub fn with_static_lock(self) -> Self {
        {
            let mut state = self.lock();
            state.pages[2][2] = 0xF0;
            state.pages[2][3] = 0xFF;
        }
        self
    }

    /// Make every READ fail.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make WRITEs to `page` fail with `63 00`.
    pub fn fail_writes_at(&self, page: u8) {
        self.lock().failing_writes.insert(page);
    }

    /// Pull the tag off the reader after `writes` successful page writes,
    /// advancing `clock` the way the reader monitor would.
    pub fn remove_after_writes(&self, writes: usize, clock: PresenceEpoch) {
        self.lock().removal = Some(Removal {
            after_writes: writes,
            clock,
        });
    }

    /// Family being simulated.
    #[must_use]
    pub fn family(&self) -> TagFamily {
        self.lock().family
    }

    /// UID bytes.
    #[must_use]
    pub fn uid(&self) -> Vec<u8> {
        self.lock().uid.clone()
    }

    /// ATR bytes.
    #[must_use]
    pub fn atr(&self) -> Vec<u8> {
        NTAG_ATR.to_vec()
    }

    /// Raw page contents, PWD/PACK included.
    #[must_use]
    pub fn page(&self, page: u8) -> [u8; PAGE_SIZE] {
        self.lock().pages[usize::from(page)]
    }

    /// Current password.
    #[must_use]
    pub fn password(&self) -> [u8; 4] {
        self.lock().password
    }

    /// Whether a `PWD_AUTH` has succeeded during this presence.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().authenticated
    }

    /// Every APDU sent, in order.
    #[must_use]
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.lock().transmitted.clone()
    }

    /// Every control request sent, in order.
    #[must_use]
    pub fn controls(&self) -> Vec<(u32, Vec<u8>)> {
        self.lock().controls.clone()
    }

    /// Pages targeted by WRITE APDUs, in order.
    #[must_use]
    pub fn written_pages(&self) -> Vec<u8> {
        self.lock()
            .transmitted
            .iter()
            .filter(|apdu| apdu.starts_with(&[0xFF, 0xD6, 0x00]) && apdu.len() == 9)
            .map(|apdu| apdu[3])
            .collect()
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl MockState {
    fn config_page(&self) -> usize {
        usize::from(self.family.config_page())
    }

    fn auth0(&self) -> u8 {
        self.pages[self.config_page()][3]
    }

    fn read_protected(&self) -> bool {
        self.pages[self.config_page() + 1][0] & 0x80 != 0
    }

    fn static_locked(&self, page: u8) -> bool {
        (3..=15).contains(&page) && (self.pages[2][2] != 0 || self.pages[2][3] != 0)
    }

    fn handle_apdu(&mut self, apdu: &[u8]) -> Vec<u8> {
        match apdu {
            [0xFF, 0xB0, 0x00, page, len] => self.read(*page, *len),
            [0xFF, 0xD6, 0x00, page, 0x04, data @ ..] if data.len() == PAGE_SIZE => {
                self.write(*page, [data[0], data[1], data[2], data[3]])
            }
            [0xFF, 0xCA, 0x00, 0x00, 0x00] => [self.uid.as_slice(), &SW_OK].concat(),
            [0xFF, 0x00, 0x00, 0x00, _, payload @ ..] => self.escape(payload),
            _ => SW_UNSUPPORTED.to_vec(),
        }
    }

    fn read(&self, page: u8, len: u8) -> Vec<u8> {
        let max_page = self.pages.len() - 1;
        if self.fail_reads || usize::from(page) > max_page || usize::from(len) > 16 {
            return SW_FAIL.to_vec();
        }
        if self.read_protected() && page >= self.auth0() && !self.authenticated {
            return SW_FAIL.to_vec();
        }

        let cfg = self.config_page();
        let mut body: Vec<u8> = (0..usize::from(len).div_ceil(PAGE_SIZE))
            .map(|offset| (usize::from(page) + offset) % self.pages.len())
            .flat_map(|index| {
                // PWD and PACK always read back as zeros.
                if index >= cfg + 2 {
                    [0u8; PAGE_SIZE]
                } else {
                    self.pages[index]
                }
            })
            .collect();
        body.truncate(usize::from(len));
        body.extend_from_slice(&SW_OK);
        body
    }

    fn write(&mut self, page: u8, data: [u8; PAGE_SIZE]) -> Vec<u8> {
        let index = usize::from(page);
        if index >= self.pages.len()
            || page < 2
            || self.failing_writes.contains(&page)
            || self.static_locked(page)
            || (page >= self.auth0() && !self.authenticated)
        {
            return SW_FAIL.to_vec();
        }

        if page == 2 {
            self.pages[2][2] |= data[2];
            self.pages[2][3] |= data[3];
        } else if index == self.config_page() + 2 {
            self.password = data;
            self.pages[index] = data;
        } else {
            self.pages[index] = data;
        }

        self.successful_writes += 1;
        if let Some(removal) = &self.removal {
            if self.successful_writes >= removal.after_writes {
                self.removed = true;
                removal.clock.advance();
            }
        }
        SW_OK.to_vec()
    }

    fn escape(&mut self, payload: &[u8]) -> Vec<u8> {
        match payload {
            [0x60, 0x00] if self.get_version => {
                let storage = self.family.storage_size();
                vec![0x00, 0x04, 0x04, 0x02, 0x01, 0x00, storage, 0x03, 0x90, 0x00]
            }
            [a, b, NTAG_PWD_AUTH, p0, p1, p2, p3] if [*a, *b] == PN532_IN_COMMUNICATE_THRU => {
                let mut reply = self.pwd_auth([*p0, *p1, *p2, *p3]);
                if self.auth_reply == AuthReply::Pn532 {
                    reply.extend_from_slice(&SW_OK);
                }
                reply
            }
            _ => SW_FAIL.to_vec(),
        }
    }

    /// Reply to `PWD_AUTH` without the transmit status word.
    fn pwd_auth(&mut self, password: [u8; 4]) -> Vec<u8> {
        let ack = password == self.password;
        if ack {
            self.authenticated = true;
        }
        let pack = self.pages[self.config_page() + 3];
        match (self.auth_reply, ack) {
            (AuthReply::Pn532, true) => vec![0xD5, 0x43, 0x00, pack[0], pack[1]],
            (AuthReply::Pn532, false) => vec![0xD5, 0x43, 0x01],
            (AuthReply::StatusOnly, false) => SW_FAIL.to_vec(),
            (AuthReply::StatusOnly | AuthReply::AlwaysOk, _) => SW_OK.to_vec(),
        }
    }
}

impl CardTransport for MockTag {
    async fn transmit(&self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.delay().await;
        let stalled = {
            let mut state = self.lock();
            state.transmitted.push(apdu.to_vec());
            state.stalled_escape && apdu.starts_with(&[0xFF, 0x00, 0x00, 0x00])
        };
        if stalled {
            tokio::time::sleep(timeout).await;
            return Err(BridgeError::TransportTimeout);
        }
        let mut state = self.lock();
        if state.removed {
            return Err(BridgeError::transport("card removed"));
        }
        Ok(state.handle_apdu(apdu))
    }

    async fn control(&self, code: u32, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.delay().await;
        let stalled = {
            let mut state = self.lock();
            state.controls.push((code, data.to_vec()));
            state.stalled_ioctl.contains(&code)
        };
        if stalled {
            tokio::time::sleep(timeout).await;
            return Err(BridgeError::TransportTimeout);
        }
        let mut state = self.lock();
        if state.removed {
            return Err(BridgeError::transport("card removed"));
        }
        if !state.ioctl_codes.contains(&code) {
            return Err(BridgeError::transport(format!(
                "control code {code:#010X} not supported"
            )));
        }
        match data {
            [a, b, NTAG_PWD_AUTH, p0, p1, p2, p3] if [*a, *b] == PN532_IN_COMMUNICATE_THRU => {
                Ok(state.pwd_auth([*p0, *p1, *p2, *p3]))
            }
            _ => Ok(SW_FAIL.to_vec()),
        }
    }
}

impl std::fmt::Debug for MockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockTag")
            .field("family", &state.family)
            .field("uid", &hex::encode_upper(&state.uid))
            .field("auth0", &state.auth0())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu;

    const T: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_protected_pages_need_authentication() {
        let tag = MockTag::new(TagFamily::Ntag213).with_password([1, 2, 3, 4], 0x04, false);
        assert!(tag.write_page_unchecked(4, &[9, 9, 9, 9], T).await.is_err());

        let reply = tag
            .transmit(&apdu::escape(&apdu::pwd_auth([1, 2, 3, 4])), T)
            .await
            .unwrap();
        assert_eq!(&reply[..3], &[0xD5, 0x43, 0x00]);
        assert!(tag.write_page_unchecked(4, &[9, 9, 9, 9], T).await.is_ok());
    }

    #[tokio::test]
    async fn test_password_pages_read_as_zero() {
        let tag = MockTag::new(TagFamily::Ntag213).with_password([1, 2, 3, 4], 0xFF, false);
        let window = tag.read_pages(41, 16, T).await.unwrap();
        assert_eq!(&window[8..], &[0; 8]);
        assert_eq!(tag.page(43), [1, 2, 3, 4]);
        assert_eq!(tag.password(), [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_control_requires_registered_code() {
        let tag = MockTag::new(TagFamily::Ntag213).with_ioctl(0x4200_0DAC);
        let frame = apdu::pwd_auth([0xFF; 4]);
        assert!(tag.control(0x0031_36B0, &frame, T).await.is_err());
        assert_eq!(
            tag.control(0x4200_0DAC, &frame, T).await.unwrap(),
            vec![0xD5, 0x43, 0x00, 0x00, 0x00]
        );
        assert_eq!(tag.controls().len(), 2);
    }

    #[tokio::test]
    async fn test_removal_after_writes() {
        let clock = PresenceEpoch::new();
        let tag = MockTag::new(TagFamily::Ntag215);
        tag.remove_after_writes(1, clock.clone());

        assert!(tag.write_page_unchecked(4, &[1, 1, 1, 1], T).await.is_ok());
        assert_eq!(clock.current(), 1);
        assert!(tag.read_pages(4, 4, T).await.is_err());
    }
}
