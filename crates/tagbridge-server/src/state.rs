//! Application state shared across handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tagbridge_core::{BridgeConfig, ReaderRegistry};

use crate::reader::ReaderCard;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: ReaderRegistry<ReaderCard>,
    started: Instant,
    clients: AtomicUsize,
}

impl AppState {
    /// Fresh state with an empty reader registry.
    #[must_use]
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry: ReaderRegistry::new(config),
                started: Instant::now(),
                clients: AtomicUsize::new(0),
            }),
        }
    }

    /// Attached readers and the event channel.
    #[must_use]
    pub fn registry(&self) -> &ReaderRegistry<ReaderCard> {
        &self.inner.registry
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started.elapsed().as_secs()
    }

    /// Open WebSocket connections.
    #[must_use]
    pub fn clients(&self) -> usize {
        self.inner.clients.load(Ordering::Relaxed)
    }

    /// Count a client for as long as the returned guard lives.
    #[must_use]
    pub fn client_guard(&self) -> ClientGuard {
        self.inner.clients.fetch_add(1, Ordering::Relaxed);
        ClientGuard(self.clone())
    }
}

/// Decrements the client count on drop.
pub struct ClientGuard(AppState);

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.inner.clients.fetch_sub(1, Ordering::Relaxed);
    }
}
