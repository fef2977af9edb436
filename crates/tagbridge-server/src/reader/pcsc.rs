//! PC/SC card transport.
//!
//! `pcsc` calls block, so each one runs on Tokio's blocking pool. The card
//! sits behind a mutex: a call abandoned by its deadline keeps the lock
//! until the driver returns, and the next call waits for it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pcsc::{Card, MAX_BUFFER_SIZE};
use tagbridge_core::{BridgeError, CardTransport, Result};
use tracing::trace;

/// A connected PC/SC card.
#[derive(Clone)]
pub struct PcscCard {
    card: Arc<Mutex<Card>>,
}

impl PcscCard {
    /// Wrap a connected card.
    #[must_use]
    pub fn new(card: Card) -> Self {
        Self {
            card: Arc::new(Mutex::new(card)),
        }
    }

    async fn call<F>(&self, timeout: Duration, op: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&Card) -> std::result::Result<Vec<u8>, pcsc::Error> + Send + 'static,
    {
        let card = Arc::clone(&self.card);
        let task = tokio::task::spawn_blocking(move || {
            let card = card.lock().unwrap_or_else(PoisonError::into_inner);
            op(&card)
        });
        run_with_deadline(timeout, task).await
    }
}

/// Await a blocking-pool task with a deadline and map PC/SC errors.
async fn run_with_deadline(
    timeout: Duration,
    task: tokio::task::JoinHandle<std::result::Result<Vec<u8>, pcsc::Error>>,
) -> Result<Vec<u8>> {
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(BridgeError::TransportTimeout),
        Ok(Err(join)) => Err(BridgeError::transport(join.to_string())),
        Ok(Ok(result)) => result.map_err(map_pcsc_error),
    }
}

/// Translate a PC/SC error.
#[must_use]
pub fn map_pcsc_error(err: pcsc::Error) -> BridgeError {
    match err {
        pcsc::Error::Timeout => BridgeError::TransportTimeout,
        pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard | pcsc::Error::ResetCard => {
            BridgeError::transport(format!("card unavailable: {err}"))
        }
        other => BridgeError::transport(other.to_string()),
    }
}

impl CardTransport for PcscCard {
    async fn transmit(&self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let apdu = apdu.to_vec();
        trace!(apdu = %hex::encode_upper(&apdu), "SCardTransmit");
        self.call(timeout, move |card| {
            let mut buf = [0u8; MAX_BUFFER_SIZE];
            card.transmit(&apdu, &mut buf).map(<[u8]>::to_vec)
        })
        .await
    }

    async fn control(&self, code: u32, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let data = data.to_vec();
        trace!(code = format_args!("{code:#010X}"), "SCardControl");
        self.call(timeout, move |card| {
            let mut buf = [0u8; MAX_BUFFER_SIZE];
            card.control(code.into(), &data, &mut buf)
                .map(<[u8]>::to_vec)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_expires() {
        let task = tokio::task::spawn_blocking(|| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(vec![0x90, 0x00])
        });
        assert_eq!(
            run_with_deadline(Duration::from_millis(10), task).await,
            Err(BridgeError::TransportTimeout)
        );
    }

    #[tokio::test]
    async fn test_result_passes_through() {
        let task = tokio::task::spawn_blocking(|| Ok(vec![0x90, 0x00]));
        assert_eq!(
            run_with_deadline(Duration::from_secs(1), task).await,
            Ok(vec![0x90, 0x00])
        );

        let task = tokio::task::spawn_blocking(|| Err(pcsc::Error::RemovedCard));
        let err = run_with_deadline(Duration::from_secs(1), task).await.unwrap_err();
        assert!(err.is_transport_error());
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(map_pcsc_error(pcsc::Error::Timeout), BridgeError::TransportTimeout);
        assert_eq!(
            map_pcsc_error(pcsc::Error::NoService).error_code(),
            "TRANSPORT_ERROR"
        );
    }
}
