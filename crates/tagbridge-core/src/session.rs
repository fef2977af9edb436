//! Per-presence tag session and the presence epoch.
//!
//! The reader monitor advances a [`PresenceEpoch`] on every physical card
//! insertion and removal. A [`Session`] remembers the epoch it was opened
//! under; once the clock moves on, the session is stale and refuses to
//! issue any write.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::apdu::{self, Response};
use crate::config::TimeoutConfig;
use crate::error::{BridgeError, Result};
use crate::layout::{Resolution, TagLayout, TagMemoryInfo};
use crate::ndef::{self, NdefContent, TlvScan};
use crate::transport::CardTransport;

/// ATR byte 5 value of an ISO 14443-3 (memory card) answer.
const ATR_ISO_14443_3_MARKER: u8 = 0x4F;

/// Bytes fetched per READ while scanning for NDEF.
const NDEF_READ_LEN: u8 = 16;

/// Monotone counter of physical presence changes, shared between the
/// reader monitor and the worker.
#[derive(Debug, Clone, Default)]
pub struct PresenceEpoch {
    current: Arc<AtomicU64>,
}

impl PresenceEpoch {
    /// A clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current epoch.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Record a presence change and return the new epoch.
    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Card standard label derived from the ATR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TagStandard {
    /// Memory card (Ultralight/NTAG).
    #[serde(rename = "TAG_ISO_14443_3")]
    Iso14443_3,
    /// Anything else.
    #[serde(rename = "TAG_ISO_14443_4")]
    Iso14443_4,
}

impl TagStandard {
    /// Classify an ATR.
    #[must_use]
    pub fn from_atr(atr: &[u8]) -> Self {
        if atr.get(5) == Some(&ATR_ISO_14443_3_MARKER) {
            Self::Iso14443_3
        } else {
            Self::Iso14443_4
        }
    }
}

impl fmt::Display for TagStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Iso14443_3 => "TAG_ISO_14443_3",
            Self::Iso14443_4 => "TAG_ISO_14443_4",
        })
    }
}

/// Who the tag is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIdentity {
    /// UID from GET DATA, empty if the reader would not report it.
    pub uid: Vec<u8>,
    /// Answer to reset.
    pub atr: Vec<u8>,
    /// Label derived from the ATR.
    pub standard: TagStandard,
}

impl TagIdentity {
    /// UID as uppercase hex.
    #[must_use]
    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }
}

/// One tag presence on one reader.
pub struct Session<T> {
    transport: T,
    identity: TagIdentity,
    memory: TagMemoryInfo,
    resolution: Resolution,
    clock: PresenceEpoch,
    epoch: u64,
    timeouts: TimeoutConfig,
}

impl<T: CardTransport> Session<T> {
    /// Open a session for a freshly inserted card and read its UID.
    ///
    /// The layout starts unresolved; see [`Session::set_layout`].
    pub async fn open(
        transport: T,
        atr: Vec<u8>,
        clock: PresenceEpoch,
        epoch: u64,
        timeouts: TimeoutConfig,
    ) -> Self {
        let uid = match transport.transmit(&apdu::GET_UID, timeouts.apdu()).await {
            Ok(raw) => {
                let response = Response::parse(&raw);
                if response.is_success() {
                    response.data
                } else {
                    warn!(response = %hex::encode_upper(&raw), "GET UID rejected");
                    Vec::new()
                }
            }
            Err(err) => {
                warn!(error = %err, "GET UID failed");
                Vec::new()
            }
        };

        let standard = TagStandard::from_atr(&atr);
        Self {
            transport,
            identity: TagIdentity { uid, atr, standard },
            memory: TagMemoryInfo::default(),
            resolution: Resolution::Unresolved,
            clock,
            epoch,
            timeouts,
        }
    }

    /// The card transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Tag identity.
    pub const fn identity(&self) -> &TagIdentity {
        &self.identity
    }

    /// Memory description.
    pub const fn memory(&self) -> &TagMemoryInfo {
        &self.memory
    }

    /// Layout resolution for this presence.
    pub const fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Deadlines in effect.
    pub const fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Epoch this session was opened under.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Record the memory description.
    pub fn set_memory(&mut self, memory: TagMemoryInfo) {
        self.memory = memory;
    }

    /// Record the layout; it does not change for the rest of the presence.
    pub fn set_layout(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    /// Layout for writes, NTAG215 geometry when detection failed.
    pub fn write_layout(&self) -> TagLayout {
        self.resolution.layout_or_fallback()
    }

    /// Returns `true` while the tag this session was opened for is present.
    pub fn is_current(&self) -> bool {
        self.clock.current() == self.epoch
    }

    /// Fail with [`BridgeError::TagRemoved`] if the session is stale.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TagRemoved`] after the presence epoch moved.
    pub fn ensure_present(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(BridgeError::TagRemoved)
        }
    }

    /// READ `len` bytes from `page`.
    ///
    /// # Errors
    ///
    /// Returns the transport or read error.
    pub async fn read_pages(&self, page: u8, len: u8) -> Result<Vec<u8>> {
        self.transport
            .read_pages(page, len, self.timeouts.apdu())
            .await
    }

    /// WRITE one page after checking the tag is still the same presence.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TagRemoved`] without transmitting when the
    /// session is stale, otherwise the transport or write error.
    pub async fn write_page(&self, page: u8, data: &[u8]) -> Result<()> {
        self.ensure_present()?;
        self.transport
            .write_page_unchecked(page, data, self.timeouts.write())
            .await
    }

    /// Write an encoded NDEF message at page 4.
    ///
    /// Returns the number of pages written.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NdefTooLarge`] before any WRITE when the
    /// message does not fit, otherwise the first failing page write.
    pub async fn write_ndef(&self, message: &[u8]) -> Result<usize> {
        let tlv = ndef::wrap_tlv(message)?;
        let capacity = self.write_layout().user_capacity();
        if tlv.len() > capacity {
            return Err(BridgeError::NdefTooLarge {
                needed: tlv.len(),
                capacity,
            });
        }

        let writes = ndef::page_writes(&tlv);
        for (page, data) in &writes {
            self.write_page(*page, data).await?;
        }
        debug!(uid = %self.identity.uid_hex(), pages = writes.len(), "NDEF written");
        Ok(writes.len())
    }

    /// Read the NDEF message from the TLV area.
    ///
    /// Reads stop at a complete TLV, a terminator, a failed READ or the end
    /// of user memory. Failures read as "no data".
    pub async fn read_ndef(&self) -> NdefContent {
        let layout = self.write_layout();
        let end_page = layout.config_page;
        let mut area = Vec::new();
        let mut page = layout.user_data_start_page;

        while page < end_page {
            match self.read_pages(page, NDEF_READ_LEN).await {
                Ok(chunk) => area.extend_from_slice(&chunk),
                Err(err) => {
                    debug!(page, error = %err, "NDEF read stopped");
                    break;
                }
            }
            match ndef::scan_tlv(&area) {
                TlvScan::Found(message) => return NdefContent::from_message(message),
                TlvScan::Absent => return NdefContent::default(),
                TlvScan::Incomplete => {}
            }
            page = page.saturating_add(NDEF_READ_LEN / 4);
        }

        NdefContent::default()
    }
}
