//! Attached readers and command routing.
//!
//! The registry spawns one [`ReaderWorker`] per attached reader and hands
//! the reader monitor a [`ReaderLink`] for feeding it card events. Client
//! commands go to the most recently attached reader.

use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bridge::{BridgeInput, ReaderWorker};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::messages::{Command, OutboundEvent, OutboundMessage};
use crate::session::PresenceEpoch;
use crate::transport::CardTransport;

/// Outbound events buffered per subscriber before the slowest lags.
pub const EVENT_CAPACITY: usize = 64;

/// Handle to one reader worker.
pub struct ReaderLink<T> {
    name: String,
    clock: PresenceEpoch,
    inputs: mpsc::Sender<BridgeInput<T>>,
}

impl<T> Clone for ReaderLink<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            clock: self.clock.clone(),
            inputs: self.inputs.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ReaderLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderLink")
            .field("name", &self.name)
            .field("epoch", &self.clock.current())
            .finish_non_exhaustive()
    }
}

impl<T: CardTransport + 'static> ReaderLink<T> {
    /// PC/SC reader name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared presence clock of this reader.
    #[must_use]
    pub const fn clock(&self) -> &PresenceEpoch {
        &self.clock
    }

    fn inserted(&self, transport: T, atr: Vec<u8>) -> BridgeInput<T> {
        let epoch = self.clock.advance();
        debug!(reader = %self.name, epoch, "Card inserted");
        BridgeInput::CardInserted {
            transport,
            atr,
            epoch,
        }
    }

    fn removed(&self) -> BridgeInput<T> {
        let epoch = self.clock.advance();
        debug!(reader = %self.name, epoch, "Card removed");
        BridgeInput::CardRemoved
    }

    /// Queue a card insertion, waiting for queue space.
    ///
    /// The presence epoch advances immediately so in-flight work on the
    /// previous card stops issuing writes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoReader`] if the worker has stopped.
    pub async fn card_inserted(&self, transport: T, atr: Vec<u8>) -> Result<()> {
        let input = self.inserted(transport, atr);
        self.inputs.send(input).await.map_err(|_| BridgeError::NoReader)
    }

    /// Queue a card removal, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoReader`] if the worker has stopped.
    pub async fn card_removed(&self) -> Result<()> {
        let input = self.removed();
        self.inputs.send(input).await.map_err(|_| BridgeError::NoReader)
    }

    /// [`card_inserted`](Self::card_inserted) for the blocking PC/SC
    /// monitor thread.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoReader`] if the worker has stopped.
    pub fn blocking_card_inserted(&self, transport: T, atr: Vec<u8>) -> Result<()> {
        let input = self.inserted(transport, atr);
        self.inputs
            .blocking_send(input)
            .map_err(|_| BridgeError::NoReader)
    }

    /// [`card_removed`](Self::card_removed) for the blocking PC/SC
    /// monitor thread.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoReader`] if the worker has stopped.
    pub fn blocking_card_removed(&self) -> Result<()> {
        let input = self.removed();
        self.inputs
            .blocking_send(input)
            .map_err(|_| BridgeError::NoReader)
    }

    /// Queue a command and wait for its result.
    ///
    /// A full queue fails at once with [`BridgeError::Busy`].
    pub async fn submit(&self, command: Command) -> OutboundMessage {
        let (reply, result) = oneshot::channel();
        let failure = |err: BridgeError| command.failure(&err, None);

        let input = BridgeInput::Command {
            command: command.clone(),
            reply,
        };
        if let Err(err) = self.inputs.try_send(input) {
            return match err {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(reader = %self.name, "Command rejected, queue full");
                    failure(BridgeError::Busy)
                }
                mpsc::error::TrySendError::Closed(_) => failure(BridgeError::NoReader),
            };
        }
        result
            .await
            .unwrap_or_else(|_| failure(BridgeError::NoReader))
    }
}

/// Every attached reader, in attachment order.
pub struct ReaderRegistry<T> {
    readers: Arc<RwLock<Vec<ReaderLink<T>>>>,
    events: broadcast::Sender<OutboundEvent>,
    config: Arc<BridgeConfig>,
}

impl<T> Clone for ReaderRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            readers: Arc::clone(&self.readers),
            events: self.events.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: CardTransport + 'static> ReaderRegistry<T> {
    /// An empty registry.
    #[must_use]
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            readers: Arc::new(RwLock::new(Vec::new())),
            events,
            config,
        }
    }

    /// Bridge configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Receive every broadcast event from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.events.subscribe()
    }

    /// Broadcast a message to all clients.
    pub fn publish(&self, message: OutboundMessage) {
        let _ = self.events.send(message.stamped());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ReaderLink<T>>> {
        self.readers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ReaderLink<T>>> {
        self.readers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a reader, start its worker and announce it.
    ///
    /// Must be called within a Tokio runtime. Attaching a name that is
    /// already present replaces the old worker.
    pub fn attach(&self, name: &str) -> ReaderLink<T> {
        let (inputs, queue) = mpsc::channel(self.config.bridge.command_queue_depth);
        let link = ReaderLink {
            name: name.to_string(),
            clock: PresenceEpoch::new(),
            inputs,
        };
        let worker = ReaderWorker::new(
            name.to_string(),
            Arc::clone(&self.config),
            link.clock.clone(),
            self.events.clone(),
        );
        tokio::spawn(worker.run(queue));

        {
            let mut readers = self.write();
            readers.retain(|r| r.name != name);
            readers.push(link.clone());
        }
        info!(reader = %name, "Reader connected");
        self.publish(OutboundMessage::ReaderConnected {
            reader: name.to_string(),
        });
        link
    }

    /// Forget a reader. Its worker stops once queued inputs drain.
    pub fn detach(&self, name: &str) {
        let removed = {
            let mut readers = self.write();
            let before = readers.len();
            readers.retain(|r| r.name != name);
            before != readers.len()
        };
        if removed {
            info!(reader = %name, "Reader disconnected");
            self.publish(OutboundMessage::ReaderDisconnected {
                reader: name.to_string(),
            });
        }
    }

    /// Names of attached readers, oldest first.
    #[must_use]
    pub fn readers(&self) -> Vec<String> {
        self.read().iter().map(|r| r.name.clone()).collect()
    }

    /// The reader commands are routed to.
    #[must_use]
    pub fn current_reader(&self) -> Option<String> {
        self.read().last().map(|r| r.name.clone())
    }

    /// The link for `name`.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<ReaderLink<T>> {
        self.read().iter().find(|r| r.name == name).cloned()
    }

    /// Route a command to the current reader and wait for the result.
    pub async fn submit(&self, command: Command) -> OutboundMessage {
        let link = self.read().last().cloned();
        match link {
            Some(link) => link.submit(command).await,
            None => command.failure(&BridgeError::NoReader, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::QueueConfig;
    use crate::layout::TagFamily;
    use crate::messages::{WriteContent, WriteOutcome};
    use crate::transport::mock::MockTag;

    fn registry(depth: usize) -> ReaderRegistry<MockTag> {
        let config = BridgeConfig {
            bridge: QueueConfig {
                command_queue_depth: depth,
            },
            ..BridgeConfig::default()
        };
        ReaderRegistry::new(Arc::new(config))
    }

    fn auth(password: &str) -> Command {
        Command::Authenticate {
            password: password.to_string(),
        }
    }

    async fn next(events: &mut broadcast::Receiver<OutboundEvent>) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap()
            .message
    }

    #[tokio::test]
    async fn test_no_reader() {
        let registry = registry(8);
        let OutboundMessage::AuthResult(outcome) = registry.submit(auth("x")).await else {
            panic!("expected auth_result");
        };
        assert_eq!(outcome.error.as_deref(), Some("No reader connected"));
    }

    #[tokio::test]
    async fn test_attach_detach_events() {
        let registry = registry(8);
        let mut events = registry.subscribe();

        registry.attach("Reader A");
        registry.attach("Reader B");
        assert_eq!(registry.readers(), vec!["Reader A", "Reader B"]);
        assert_eq!(registry.current_reader().as_deref(), Some("Reader B"));
        assert_eq!(
            next(&mut events).await,
            OutboundMessage::ReaderConnected {
                reader: "Reader A".to_string()
            }
        );
        let _ = next(&mut events).await;

        registry.detach("Reader B");
        registry.detach("Reader B");
        assert_eq!(registry.current_reader().as_deref(), Some("Reader A"));
        assert_eq!(
            next(&mut events).await,
            OutboundMessage::ReaderDisconnected {
                reader: "Reader B".to_string()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_tag_on_reader() {
        let registry = registry(8);
        registry.attach("Reader");
        let OutboundMessage::WriteResult(outcome) = registry
            .submit(Command::Write {
                content: WriteContent::Url("https://t.example".to_string()),
                password: None,
            })
            .await
        else {
            panic!("expected write_result");
        };
        assert_eq!(outcome.error.as_deref(), Some("No tag present on reader"));
    }

    #[tokio::test]
    async fn test_card_events_reach_clients() {
        let registry = registry(8);
        let mut events = registry.subscribe();
        let link = registry.attach("Reader");
        let _ = next(&mut events).await;

        let tag = MockTag::new(TagFamily::Ntag215);
        link.card_inserted(tag.clone(), tag.atr()).await.unwrap();
        assert!(matches!(next(&mut events).await, OutboundMessage::TagDetected(_)));
        assert_eq!(link.clock().current(), 1);

        link.card_removed().await.unwrap();
        assert_eq!(next(&mut events).await, OutboundMessage::TagRemoved {});
        assert_eq!(link.clock().current(), 2);
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let registry = registry(8);
        let link = registry.attach("Reader");
        let tag = MockTag::new(TagFamily::Ntag213).with_latency(Duration::from_millis(2));
        link.card_inserted(tag.clone(), tag.atr()).await.unwrap();

        let first = registry.submit(Command::Write {
            content: WriteContent::Url("https://t.example/one".to_string()),
            password: None,
        });
        let second = registry.submit(auth("FFFFFFFF"));
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(
            first,
            OutboundMessage::WriteResult(WriteOutcome { success: true, .. })
        ));
        let OutboundMessage::AuthResult(outcome) = second else {
            panic!("expected auth_result");
        };
        assert!(outcome.success);

        // Every WRITE of the first command precedes the second command's APDUs.
        let log = tag.transmitted();
        let last_write = log.iter().rposition(|a| a[1] == 0xD6).unwrap();
        let first_auth = log.iter().position(|a| a.len() == 12 && a[7] == 0x1B).unwrap();
        assert!(last_write < first_auth);
    }

    #[tokio::test]
    async fn test_full_queue_is_busy() {
        let registry = registry(1);
        let link = registry.attach("Reader");
        let tag = MockTag::new(TagFamily::Ntag213).with_latency(Duration::from_millis(20));
        // Occupies the worker for a while.
        link.card_inserted(tag.clone(), tag.atr()).await.unwrap();
        // Fills the single queue slot.
        link.card_removed().await.unwrap();

        let OutboundMessage::AuthResult(outcome) = registry.submit(auth("FFFFFFFF")).await else {
            panic!("expected auth_result");
        };
        assert_eq!(outcome.error.as_deref(), Some("Reader is busy; too many commands are queued"));
    }
}
