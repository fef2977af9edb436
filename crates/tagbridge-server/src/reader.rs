//! Reader hardware.
//!
//! - `pcsc` - [`PcscCard`], the PC/SC implementation of [`CardTransport`]
//! - `monitor` - the blocking loop that watches PC/SC for readers and cards

use std::time::Duration;

use tagbridge_core::{CardTransport, Result};

pub mod monitor;
pub mod pcsc;

pub use monitor::{ReaderMonitor, StopHandle};
pub use pcsc::PcscCard;

/// A card handle as seen by the reader workers.
pub enum ReaderCard {
    /// A card connected through PC/SC.
    Pcsc(PcscCard),
    /// A simulated NTAG21x.
    #[cfg(any(test, feature = "mock-reader"))]
    Simulated(tagbridge_core::MockTag),
}

impl CardTransport for ReaderCard {
    async fn transmit(&self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        match self {
            Self::Pcsc(card) => card.transmit(apdu, timeout).await,
            #[cfg(any(test, feature = "mock-reader"))]
            Self::Simulated(tag) => tag.transmit(apdu, timeout).await,
        }
    }

    async fn control(&self, code: u32, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        match self {
            Self::Pcsc(card) => card.control(code, data, timeout).await,
            #[cfg(any(test, feature = "mock-reader"))]
            Self::Simulated(tag) => tag.control(code, data, timeout).await,
        }
    }
}
