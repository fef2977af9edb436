//! The reader transport seam.
//!
//! [`CardTransport`] is the only way the protocol layers reach a tag. The
//! server implements it over PC/SC; tests use the simulated NTAG in
//! [`mock`].

use std::future::Future;
use std::time::Duration;

use crate::apdu;
use crate::error::Result;

#[cfg(any(test, feature = "mock-reader"))]
pub mod mock;

/// A connected card, reachable through APDUs and reader control codes.
///
/// Every call carries its own deadline. Implementations report an expired
/// deadline as [`BridgeError::TransportTimeout`](crate::BridgeError::TransportTimeout)
/// and must not start the next call until an abandoned one has finished.
pub trait CardTransport: Send + Sync {
    /// Send an APDU and return the raw response including the status word.
    fn transmit(
        &self,
        apdu: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Send a reader control (IOCTL) request and return the raw response.
    fn control(
        &self,
        code: u32,
        data: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// READ `len` bytes starting at `page`.
    fn read_pages(
        &self,
        page: u8,
        len: u8,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send {
        async move {
            let raw = self.transmit(&apdu::read(page, len), timeout).await?;
            apdu::parse_read(page, len, &raw)
        }
    }

    /// WRITE one page without any presence check.
    ///
    /// Callers holding a tag session should go through
    /// [`Session::write_page`](crate::session::Session::write_page) instead.
    fn write_page_unchecked(
        &self,
        page: u8,
        data: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<()>> + Send {
        let command = apdu::write(page, data);
        async move {
            let raw = self.transmit(&command?, timeout).await?;
            apdu::parse_write(page, &raw)
        }
    }
}
