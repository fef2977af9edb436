//! Tag family detection and memory layout resolution.
//!
//! NTAG21x parts share a layout that differs only in where the
//! configuration block sits:
//!
//! | page        | contents                                  |
//! |-------------|-------------------------------------------|
//! | 2           | UID tail, internal, static lock bytes     |
//! | 4           | start of user memory (NDEF TLV area)      |
//! | cfg         | MIRROR, RFUI, MIRROR_PAGE, AUTH0          |
//! | cfg + 1     | ACCESS, RFUI x3                           |
//! | cfg + 2     | PWD (write only)                          |
//! | cfg + 3     | PACK x2, RFUI x2 (last page)              |
//!
//! GET_VERSION identifies the family exactly when the reader passes it
//! through. Otherwise the candidate configuration pages are probed.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use utoipa::ToSchema;

use crate::apdu::{self, Response};
use crate::error::{BridgeError, Result};
use crate::ndef::USER_DATA_START_PAGE;
use crate::transport::CardTransport;

/// Bytes returned by one probing READ.
pub const CONFIG_WINDOW_LEN: u8 = 16;

/// NXP product type byte for NTAG parts.
const PRODUCT_TYPE_NTAG: u8 = 0x04;

/// Supported NTAG families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagFamily {
    /// 144 bytes user memory.
    #[serde(rename = "NTAG213")]
    Ntag213,
    /// 504 bytes user memory.
    #[serde(rename = "NTAG215")]
    Ntag215,
    /// 888 bytes user memory.
    #[serde(rename = "NTAG216")]
    Ntag216,
    /// 128 bytes user memory.
    #[serde(rename = "NTAG210/212")]
    Ntag210212,
}

impl TagFamily {
    /// Order in which configuration pages are probed.
    pub const PROBE_ORDER: [Self; 4] = [Self::Ntag213, Self::Ntag215, Self::Ntag216, Self::Ntag210212];

    /// First configuration page (holds AUTH0 in byte 3).
    #[must_use]
    pub const fn config_page(self) -> u8 {
        match self {
            Self::Ntag213 => 41,
            Self::Ntag215 => 131,
            Self::Ntag216 => 227,
            Self::Ntag210212 => 37,
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ntag213 => "NTAG213",
            Self::Ntag215 => "NTAG215",
            Self::Ntag216 => "NTAG216",
            Self::Ntag210212 => "NTAG210/212",
        }
    }

    /// GET_VERSION storage-size byte for this family.
    #[must_use]
    pub const fn storage_size(self) -> u8 {
        match self {
            Self::Ntag213 => 0x0F,
            Self::Ntag215 => 0x11,
            Self::Ntag216 => 0x13,
            Self::Ntag210212 => 0x0E,
        }
    }

    /// Family from GET_VERSION product type and storage size.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnsupportedTagFamily`] for anything else.
    pub fn from_version(product_type: u8, storage_size: u8) -> Result<Self> {
        if product_type != PRODUCT_TYPE_NTAG {
            return Err(BridgeError::UnsupportedTagFamily);
        }
        Self::PROBE_ORDER
            .into_iter()
            .find(|family| family.storage_size() == storage_size)
            .ok_or(BridgeError::UnsupportedTagFamily)
    }

    /// Memory description for this family.
    #[must_use]
    pub fn memory_info(self) -> TagMemoryInfo {
        let (tag_type, memory_size, usable_pages) = match self {
            Self::Ntag213 => ("NTAG213", 180, 45),
            Self::Ntag215 => ("NTAG215", 540, 135),
            Self::Ntag216 => ("NTAG216", 924, 231),
            Self::Ntag210212 => ("NTAG212", 164, 41),
        };
        TagMemoryInfo {
            tag_type: tag_type.to_string(),
            memory_size,
            usable_pages,
        }
    }
}

impl fmt::Display for TagFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Page numbers of one tag family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagLayout {
    /// First NDEF page.
    pub user_data_start_page: u8,
    /// CFG0 page.
    pub config_page: u8,
    /// PWD page.
    pub password_page: u8,
    /// PACK page.
    pub pack_page: u8,
    /// Last page of the tag.
    pub max_page: u8,
    /// Family the layout belongs to.
    pub family: TagFamily,
}

impl TagLayout {
    /// The layout of `family`.
    #[must_use]
    pub const fn for_family(family: TagFamily) -> Self {
        let config_page = family.config_page();
        Self {
            user_data_start_page: USER_DATA_START_PAGE,
            config_page,
            password_page: config_page + 2,
            pack_page: config_page + 3,
            max_page: config_page + 3,
            family,
        }
    }

    /// Geometry assumed for writes when detection fails.
    #[must_use]
    pub const fn fallback() -> Self {
        Self::for_family(TagFamily::Ntag215)
    }

    /// Bytes available for the NDEF TLV area.
    ///
    /// The dynamic lock page directly below CFG0 is excluded.
    #[must_use]
    pub const fn user_capacity(&self) -> usize {
        (self.config_page - 1 - self.user_data_start_page) as usize * apdu::PAGE_SIZE
    }
}

/// Memory description reported with a detected tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagMemoryInfo {
    /// Product name, `Unknown` when undetermined.
    #[schema(example = "NTAG215")]
    pub tag_type: String,
    /// Total memory in bytes.
    pub memory_size: u16,
    /// Total pages.
    pub usable_pages: u16,
}

impl Default for TagMemoryInfo {
    fn default() -> Self {
        Self {
            tag_type: "Unknown".to_string(),
            memory_size: 0,
            usable_pages: 0,
        }
    }
}

impl TagMemoryInfo {
    /// Guess from the ATR when GET_VERSION is unavailable.
    #[must_use]
    pub fn from_atr(atr: &[u8]) -> Self {
        let atr = hex::encode_upper(atr);
        let (tag_type, memory_size, usable_pages) = if atr.contains("00440300") {
            ("MIFARE Ultralight", 64, 16)
        } else if atr.contains("00440301") {
            ("NTAG203", 168, 42)
        } else {
            return Self::default();
        };
        Self {
            tag_type: tag_type.to_string(),
            memory_size,
            usable_pages,
        }
    }
}

/// Fields of a GET_VERSION reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Byte 2.
    pub product_type: u8,
    /// Byte 3.
    pub product_subtype: u8,
    /// Byte 6.
    pub storage_size: u8,
}

impl VersionInfo {
    /// Parse a GET_VERSION reply body (at least 8 bytes).
    #[must_use]
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 8 {
            return None;
        }
        Some(Self {
            product_type: body[2],
            product_subtype: body[3],
            storage_size: body[6],
        })
    }

    /// The family this version identifies.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnsupportedTagFamily`] for unknown products.
    pub fn family(&self) -> Result<TagFamily> {
        TagFamily::from_version(self.product_type, self.storage_size)
    }
}

/// Send GET_VERSION. Any failure means "unknown".
pub async fn get_version<T: CardTransport>(transport: &T, timeout: Duration) -> Option<VersionInfo> {
    match transport.transmit(&apdu::GET_VERSION, timeout).await {
        Ok(raw) => {
            let response = Response::parse(&raw);
            if !response.is_success() {
                trace!(response = %hex::encode_upper(&raw), "GET_VERSION not supported");
                return None;
            }
            VersionInfo::parse(&response.data)
        }
        Err(err) => {
            trace!(error = %err, "GET_VERSION failed");
            None
        }
    }
}

/// How the layout was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    /// GET_VERSION named the family.
    Version,
    /// A configuration page probe succeeded.
    Probe,
}

/// Outcome of layout resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The layout is known.
    Resolved {
        /// The layout.
        layout: TagLayout,
        /// The 16-byte window at CFG0, if it could be read.
        config: Option<Vec<u8>>,
        /// Detection method.
        by: ResolvedBy,
    },
    /// No candidate matched.
    Unresolved,
}

impl Resolution {
    /// The resolved layout.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::LayoutUnresolved`] if detection failed.
    pub fn layout(&self) -> Result<TagLayout> {
        match self {
            Self::Resolved { layout, .. } => Ok(*layout),
            Self::Unresolved => Err(BridgeError::LayoutUnresolved),
        }
    }

    /// The resolved layout, or NTAG215 geometry for write paths.
    #[must_use]
    pub fn layout_or_fallback(&self) -> TagLayout {
        self.layout().unwrap_or_else(|_| TagLayout::fallback())
    }
}

/// An all-zero first page means the window is user memory or an unreadable
/// configuration, never a real CFG0.
fn is_blank_window(window: &[u8]) -> bool {
    window.len() < 4 || window.starts_with(&[0, 0, 0, 0])
}

/// Resolve the layout of the tag behind `transport`.
///
/// A `known` family from GET_VERSION is used as is; its configuration
/// window is read, and a failed read or an all-zero window leaves the
/// configuration unknown without demoting the family. Otherwise each
/// candidate is probed in [`TagFamily::PROBE_ORDER`]; read failures and
/// all-zero windows move on to the next candidate.
pub async fn resolve<T: CardTransport>(
    transport: &T,
    known: Option<TagFamily>,
    timeout: Duration,
) -> Resolution {
    if let Some(family) = known {
        let layout = TagLayout::for_family(family);
        let config = match transport
            .read_pages(layout.config_page, CONFIG_WINDOW_LEN, timeout)
            .await
        {
            Ok(window) if is_blank_window(&window) => {
                debug!(family = %family, "All-zero config window, treating as unreadable");
                None
            }
            Ok(window) => Some(window),
            Err(err) => {
                trace!(family = %family, error = %err, "Config window read failed");
                None
            }
        };
        debug!(family = %family, config_readable = config.is_some(), "Layout from GET_VERSION");
        return Resolution::Resolved {
            layout,
            config,
            by: ResolvedBy::Version,
        };
    }

    for family in TagFamily::PROBE_ORDER {
        let page = family.config_page();
        match transport.read_pages(page, CONFIG_WINDOW_LEN, timeout).await {
            Ok(window) if !is_blank_window(&window) => {
                debug!(family = %family, page, "Layout from probe");
                return Resolution::Resolved {
                    layout: TagLayout::for_family(family),
                    config: Some(window),
                    by: ResolvedBy::Probe,
                };
            }
            Ok(_) => trace!(page, "All-zero config window, trying next candidate"),
            Err(err) => trace!(page, error = %err, "Config probe failed"),
        }
    }

    debug!("Could not detect tag layout");
    Resolution::Unresolved
}
