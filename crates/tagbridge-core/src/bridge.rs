//! The per-reader worker.
//!
//! A worker owns the session for one physical reader and consumes card
//! events and client commands from a single bounded FIFO, one at a time.
//! Tag events are broadcast; command results go back to the requester.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::layout::{self, TagMemoryInfo};
use crate::messages::{
    AuthOutcome, Command, OutboundEvent, OutboundMessage, TagSummary, WriteContent, WriteOutcome,
};
use crate::protection::{self, ProtectionOutcome};
use crate::session::{PresenceEpoch, Session};
use crate::transport::CardTransport;

/// Input queued for a reader worker.
pub enum BridgeInput<T> {
    /// A card was connected. `epoch` is the presence epoch after insertion.
    CardInserted {
        /// Connected card handle.
        transport: T,
        /// Answer to reset.
        atr: Vec<u8>,
        /// Presence epoch the card belongs to.
        epoch: u64,
    },
    /// The card left the field.
    CardRemoved,
    /// A client command and where to send its result.
    Command {
        /// Validated command.
        command: Command,
        /// Receives the `auth_result` or `write_result`.
        reply: oneshot::Sender<OutboundMessage>,
    },
}

impl<T> std::fmt::Debug for BridgeInput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CardInserted { atr, epoch, .. } => f
                .debug_struct("CardInserted")
                .field("atr", &hex::encode_upper(atr))
                .field("epoch", epoch)
                .finish_non_exhaustive(),
            Self::CardRemoved => f.write_str("CardRemoved"),
            Self::Command { command, .. } => f.debug_tuple("Command").field(command).finish(),
        }
    }
}

/// Serializes every operation on one reader.
pub struct ReaderWorker<T> {
    reader: String,
    config: Arc<BridgeConfig>,
    clock: PresenceEpoch,
    events: broadcast::Sender<OutboundEvent>,
    session: Option<Session<T>>,
}

impl<T: CardTransport> ReaderWorker<T> {
    /// A worker for `reader` with no tag present.
    #[must_use]
    pub const fn new(
        reader: String,
        config: Arc<BridgeConfig>,
        clock: PresenceEpoch,
        events: broadcast::Sender<OutboundEvent>,
    ) -> Self {
        Self {
            reader,
            config,
            clock,
            events,
            session: None,
        }
    }

    /// Consume inputs until every sender is gone.
    pub async fn run(mut self, mut inputs: mpsc::Receiver<BridgeInput<T>>) {
        debug!(reader = %self.reader, "Reader worker started");
        while let Some(input) = inputs.recv().await {
            self.handle(input).await;
        }
        debug!(reader = %self.reader, "Reader worker stopped");
    }

    /// Process one input to completion.
    pub async fn handle(&mut self, input: BridgeInput<T>) {
        match input {
            BridgeInput::CardInserted {
                transport,
                atr,
                epoch,
            } => self.card_inserted(transport, atr, epoch).await,
            BridgeInput::CardRemoved => self.card_removed(),
            BridgeInput::Command { command, reply } => {
                let result = self.execute(&command).await;
                if reply.send(result).is_err() {
                    debug!(reader = %self.reader, "Requester went away before the result");
                }
            }
        }
    }

    fn publish(&self, message: OutboundMessage) {
        // No subscribers is not an error.
        let _ = self.events.send(message.stamped());
    }

    async fn card_inserted(&mut self, transport: T, atr: Vec<u8>, epoch: u64) {
        // A new card without a removal in between means the old one was swapped out.
        self.card_removed();

        let timeouts = self.config.timeouts;
        let mut session = Session::open(transport, atr, self.clock.clone(), epoch, timeouts).await;

        let version = layout::get_version(session.transport(), timeouts.apdu()).await;
        let family = version.and_then(|v| v.family().ok());
        let memory = family.map_or_else(
            || TagMemoryInfo::from_atr(&session.identity().atr),
            layout::TagFamily::memory_info,
        );
        session.set_memory(memory);

        let resolution = layout::resolve(session.transport(), family, timeouts.apdu()).await;
        session.set_layout(resolution);

        let protection = protection::check_protection(&session).await;
        let ndef = session.read_ndef().await;

        if !session.is_current() {
            debug!(reader = %self.reader, epoch, "Tag left during detection");
            return;
        }

        let summary = TagSummary::new(
            session.identity(),
            session.memory().clone(),
            protection,
            ndef,
        );
        info!(
            reader = %self.reader,
            uid = %summary.uid,
            tag_type = %summary.memory.tag_type,
            has_ndef = summary.ndef.has_data,
            "Tag detected"
        );
        self.session = Some(session);
        self.publish(OutboundMessage::TagDetected(summary));
    }

    fn card_removed(&mut self) {
        if let Some(session) = self.session.take() {
            info!(reader = %self.reader, uid = %session.identity().uid_hex(), "Tag removed");
            self.publish(OutboundMessage::TagRemoved {});
        }
    }

    /// Run a command against the current tag.
    pub async fn execute(&self, command: &Command) -> OutboundMessage {
        let Some(session) = self.session.as_ref().filter(|s| s.is_current()) else {
            return command.failure(&BridgeError::NoTagPresent, None);
        };
        let uid = Some(session.identity().uid_hex());

        let result = match command {
            Command::Authenticate { password } => {
                OutboundMessage::AuthResult(self.authenticate(session, password, uid.clone()).await)
            }
            Command::Write { content, password } => OutboundMessage::WriteResult(
                self.write(session, content, password.as_deref(), uid.clone())
                    .await,
            ),
        };

        if session.is_current() {
            result
        } else {
            warn!(reader = %self.reader, "Tag removed during command");
            command.failure(&BridgeError::TagRemoved, uid)
        }
    }

    async fn authenticate(
        &self,
        session: &Session<T>,
        password: &str,
        uid: Option<String>,
    ) -> AuthOutcome {
        let authenticator =
            Authenticator::new(self.config.auth, self.config.timeouts.auth_attempt());
        match authenticator.authenticate(session.transport(), password).await {
            Ok(success) => AuthOutcome::success(&success, uid),
            Err(err) => AuthOutcome::failure(&err, uid),
        }
    }

    async fn write(
        &self,
        session: &Session<T>,
        content: &WriteContent,
        password: Option<&str>,
        uid: Option<String>,
    ) -> WriteOutcome {
        let message = match content.encode() {
            Ok(message) => message,
            Err(err) => return WriteOutcome::failure(&err, uid),
        };
        if let Err(err) = session.write_ndef(&message).await {
            warn!(reader = %self.reader, error = %err, "NDEF write failed");
            return WriteOutcome::failure(&err, uid);
        }

        let Some(password) = password else {
            return WriteOutcome::written(false, uid);
        };
        match protection::enable_protection(session, password, &self.config.protection).await {
            Ok(ProtectionOutcome { caveat: None, .. }) => WriteOutcome::written(true, uid),
            Ok(ProtectionOutcome {
                caveat: Some(caveat),
                ..
            }) => WriteOutcome::with_caveat(&caveat, uid),
            Err(err) => WriteOutcome::password_failed(&err, uid),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::layout::TagFamily;
    use crate::messages::WriteContent;
    use crate::transport::mock::MockTag;

    struct Harness {
        worker: ReaderWorker<MockTag>,
        clock: PresenceEpoch,
        events: broadcast::Receiver<OutboundEvent>,
    }

    fn harness() -> Harness {
        let (tx, events) = broadcast::channel(16);
        let clock = PresenceEpoch::new();
        let worker = ReaderWorker::new(
            "ACS ACR122U 00 00".to_string(),
            Arc::new(BridgeConfig::default()),
            clock.clone(),
            tx,
        );
        Harness {
            worker,
            clock,
            events,
        }
    }

    impl Harness {
        async fn insert(&mut self, tag: &MockTag) {
            let epoch = self.clock.advance();
            self.worker
                .handle(BridgeInput::CardInserted {
                    transport: tag.clone(),
                    atr: tag.atr(),
                    epoch,
                })
                .await;
        }

        fn next_event(&mut self) -> OutboundMessage {
            self.events.try_recv().unwrap().message
        }
    }

    fn write_url(url: &str, password: Option<&str>) -> Command {
        Command::Write {
            content: WriteContent::Url(url.to_string()),
            password: password.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_insert_publishes_summary() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag213);
        h.insert(&tag).await;

        let OutboundMessage::TagDetected(summary) = h.next_event() else {
            panic!("expected tag_detected");
        };
        assert_eq!(summary.uid, "04A1B2C3D4E580");
        assert_eq!(summary.memory.tag_type, "NTAG213");
        assert_eq!(summary.memory.memory_size, 180);
        assert!(summary.protection.is_writable);
        assert!(!summary.ndef.has_data);
    }

    #[tokio::test]
    async fn test_removal_publishes_once() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag213);
        h.insert(&tag).await;
        let _ = h.next_event();

        h.clock.advance();
        h.worker.handle(BridgeInput::CardRemoved).await;
        assert_eq!(h.next_event(), OutboundMessage::TagRemoved {});

        h.worker.handle(BridgeInput::CardRemoved).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_insert_over_existing_session_removes_it() {
        let mut h = harness();
        let first = MockTag::new(TagFamily::Ntag213);
        h.insert(&first).await;
        let _ = h.next_event();

        let second = MockTag::new(TagFamily::Ntag215).with_uid([0x04, 1, 2, 3, 4, 5, 6]);
        h.insert(&second).await;
        assert_eq!(h.next_event(), OutboundMessage::TagRemoved {});
        let OutboundMessage::TagDetected(summary) = h.next_event() else {
            panic!("expected tag_detected");
        };
        assert_eq!(summary.uid, "04010203040506");
        assert_eq!(summary.memory.tag_type, "NTAG215");
        assert!(h.events.try_recv().is_err());

        h.clock.advance();
        h.worker.handle(BridgeInput::CardRemoved).await;
        assert_eq!(h.next_event(), OutboundMessage::TagRemoved {});
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_command_without_tag() {
        let h = harness();
        let result = h
            .worker
            .execute(&Command::Authenticate {
                password: "FFFFFFFF".to_string(),
            })
            .await;
        let OutboundMessage::AuthResult(outcome) = result else {
            panic!("expected auth_result");
        };
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("No tag present on reader"));
    }

    #[tokio::test]
    async fn test_write_url_end_to_end() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag215);
        h.insert(&tag).await;

        let result = h
            .worker
            .execute(&write_url("https://t.example/TAG-001", None))
            .await;
        assert_eq!(
            result,
            OutboundMessage::WriteResult(WriteOutcome::written(
                false,
                Some("04A1B2C3D4E580".to_string())
            ))
        );
        // 22-byte record, 2-byte TLV header and terminator: 25 bytes, 7 pages.
        assert_eq!(tag.written_pages(), vec![4, 5, 6, 7, 8, 9, 10]);

        // Re-detect and read back.
        h.insert(&tag).await;
        let _ = h.next_event();
        let OutboundMessage::TagDetected(summary) = h.next_event() else {
            panic!("expected tag_detected");
        };
        assert_eq!(
            summary.ndef.records[0].url.as_deref(),
            Some("https://t.example/TAG-001")
        );
    }

    #[tokio::test]
    async fn test_write_with_password_then_authenticate() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag213);
        h.insert(&tag).await;

        let result = h
            .worker
            .execute(&write_url("https://t.example/TAG-002", Some("s3cret")))
            .await;
        let OutboundMessage::WriteResult(outcome) = result else {
            panic!("expected write_result");
        };
        assert!(outcome.success);
        assert_eq!(outcome.password_set, Some(true));
        assert_eq!(tag.page(41)[3], 0x04);
        assert_eq!(tag.password(), *b"s3cr");

        // Next presence reports the protection.
        h.insert(&tag).await;
        let _ = h.next_event();
        let OutboundMessage::TagDetected(summary) = h.next_event() else {
            panic!("expected tag_detected");
        };
        assert!(summary.protection.password_protected);
        assert_eq!(summary.protection.auth0_page, 4);

        let OutboundMessage::AuthResult(auth) = h
            .worker
            .execute(&Command::Authenticate {
                password: "s3cret".to_string(),
            })
            .await
        else {
            panic!("expected auth_result");
        };
        assert!(auth.success);
        assert_eq!(auth.password_bytes.as_deref(), Some("73336372"));
    }

    #[tokio::test]
    async fn test_protection_caveat_keeps_success() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag213);
        h.insert(&tag).await;
        tag.fail_writes_at(41);

        let OutboundMessage::WriteResult(outcome) = h
            .worker
            .execute(&write_url("https://t.example/x", Some("pw")))
            .await
        else {
            panic!("expected write_result");
        };
        assert!(outcome.success);
        assert_eq!(outcome.password_set, Some(false));
        assert_eq!(outcome.ndef_written, Some(true));
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_password_page_failure() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag213);
        h.insert(&tag).await;
        tag.fail_writes_at(43);

        let OutboundMessage::WriteResult(outcome) = h
            .worker
            .execute(&write_url("https://t.example/x", Some("pw")))
            .await
        else {
            panic!("expected write_result");
        };
        assert!(!outcome.success);
        assert_eq!(outcome.ndef_written, Some(true));
        assert!(outcome
            .error
            .unwrap()
            .starts_with("NDEF written but password setting failed"));
    }

    #[tokio::test]
    async fn test_removal_mid_write() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag216);
        h.insert(&tag).await;
        tag.remove_after_writes(2, h.clock.clone());

        let result = h.worker.execute(&write_url(&"https://t.example/".repeat(4), None)).await;
        let OutboundMessage::WriteResult(outcome) = result else {
            panic!("expected write_result");
        };
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Tag was removed before the operation completed")
        );
        assert_eq!(tag.written_pages(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_factory_password_on_unprotected_tag() {
        let mut h = harness();
        let tag = MockTag::new(TagFamily::Ntag215).with_latency(Duration::from_millis(1));
        h.insert(&tag).await;

        let OutboundMessage::AuthResult(auth) = h
            .worker
            .execute(&Command::Authenticate {
                password: "FFFFFFFF".to_string(),
            })
            .await
        else {
            panic!("expected auth_result");
        };
        assert!(auth.success);
        assert_eq!(auth.confidence, Some(crate::auth::Confidence::Confirmed));
    }
}
