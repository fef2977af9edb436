//! PC/SC reader and card monitor.
//!
//! Runs on a blocking thread. It keeps one `SCardGetStatusChange` wait open
//! over every accepted reader plus the PnP pseudo-reader, attaches and
//! detaches readers in the [`ReaderRegistry`], and turns card presence
//! transitions into worker inputs. Losing the PC/SC service detaches every
//! reader and re-establishes the context.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pcsc::{Context, Protocols, ReaderState, Scope, ShareMode, State, PNP_NOTIFICATION};
use tagbridge_core::{OutboundMessage, ReaderConfig, ReaderLink, ReaderRegistry};
use tracing::{debug, error, info, warn};

use super::{PcscCard, ReaderCard};

/// Wait before re-establishing a lost PC/SC context.
const RECOVERY_DELAY: Duration = Duration::from_secs(2);

/// Granularity of interruptible sleeps.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Signals the monitor loop to exit.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the monitor to stop after its current wait.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Card presence change on one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A tag entered the field.
    Arrived,
    /// The tag left the field.
    Departed,
    /// One tag left and another arrived between two waits.
    Swapped,
}

/// Card presence last seen on one reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presence {
    /// A responsive card is in the field.
    pub present: bool,
    /// Reader card event counter at that time.
    pub event_count: u32,
}

impl Presence {
    /// Presence as reported by a reader event.
    ///
    /// A mute card (present but unresponsive) counts as absent.
    #[must_use]
    pub fn from_event(event: State, event_count: u32) -> Self {
        Self {
            present: event.contains(State::PRESENT) && !event.contains(State::MUTE),
            event_count,
        }
    }
}

/// Work out the presence transition between two observations.
///
/// The event counter moves on every insertion and removal, so a card that is
/// present in both but with a different count was replaced. Readers that do
/// not maintain the counter report zero and swaps go unnoticed there.
#[must_use]
pub fn presence_transition(last: Presence, now: Presence) -> Option<Transition> {
    match (last.present, now.present) {
        (false, true) => Some(Transition::Arrived),
        (true, false) => Some(Transition::Departed),
        (true, true) if now.event_count != last.event_count => Some(Transition::Swapped),
        _ => None,
    }
}

/// Readers to attach and detach to go from `known` to `current`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReaderDiff {
    /// Newly visible readers.
    pub added: Vec<String>,
    /// Readers that disappeared.
    pub removed: Vec<String>,
}

/// Compare the tracked reader names against a fresh listing.
#[must_use]
pub fn diff_readers<'a>(
    known: impl IntoIterator<Item = &'a str> + Clone,
    current: &[String],
) -> ReaderDiff {
    let removed = known
        .clone()
        .into_iter()
        .filter(|name| !current.iter().any(|c| c == name))
        .map(str::to_string)
        .collect();
    let added = current
        .iter()
        .filter(|name| !known.clone().into_iter().any(|k| k == name.as_str()))
        .cloned()
        .collect();
    ReaderDiff { added, removed }
}

struct Tracked {
    link: ReaderLink<ReaderCard>,
    presence: Presence,
}

/// Watches PC/SC and feeds the registry.
pub struct ReaderMonitor {
    registry: ReaderRegistry<ReaderCard>,
    config: ReaderConfig,
    stop: StopHandle,
    readers: HashMap<String, Tracked>,
}

impl ReaderMonitor {
    /// Create a monitor for the given registry.
    #[must_use]
    pub fn new(registry: ReaderRegistry<ReaderCard>, config: ReaderConfig) -> Self {
        Self {
            registry,
            config,
            stop: StopHandle::default(),
            readers: HashMap::new(),
        }
    }

    /// Handle for stopping [`run`](Self::run) from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Monitor until stopped. Blocks the calling thread.
    ///
    /// Must run inside a Tokio runtime context, e.g. via
    /// [`tokio::task::spawn_blocking`], since attaching a reader spawns its
    /// worker task.
    pub fn run(mut self) {
        let mut outage_reported = false;

        while !self.stop.is_stopped() {
            let ctx = match Context::establish(Scope::User) {
                Ok(ctx) => ctx,
                Err(err) => {
                    if !outage_reported {
                        error!(error = %err, "Failed to establish PC/SC context");
                        self.registry
                            .publish(OutboundMessage::error(format!("PC/SC unavailable: {err}")));
                        outage_reported = true;
                    }
                    self.pause(RECOVERY_DELAY);
                    continue;
                }
            };
            info!("PC/SC context established");
            outage_reported = false;

            if let Err(err) = self.watch(&ctx) {
                warn!(error = %err, "PC/SC service lost, reconnecting");
                self.registry
                    .publish(OutboundMessage::error(format!("Reader service error: {err}")));
            }
            self.detach_all();
            self.pause(RECOVERY_DELAY);
        }

        self.detach_all();
        info!("Reader monitor stopped");
    }

    fn pause(&self, duration: Duration) {
        let mut left = duration;
        while !left.is_zero() && !self.stop.is_stopped() {
            let step = left.min(STOP_POLL);
            std::thread::sleep(step);
            left -= step;
        }
    }

    fn watch(&mut self, ctx: &Context) -> Result<(), pcsc::Error> {
        let mut states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
        self.refresh(ctx, &mut states)?;

        while !self.stop.is_stopped() {
            match ctx.get_status_change(self.poll_interval(), &mut states) {
                Ok(()) => {}
                Err(pcsc::Error::Timeout) => continue,
                Err(err @ (pcsc::Error::ServiceStopped | pcsc::Error::NoService)) => {
                    return Err(err);
                }
                Err(pcsc::Error::UnknownReader) => {
                    self.refresh(ctx, &mut states)?;
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "Status change wait failed");
                    self.pause(self.poll_interval());
                    continue;
                }
            }

            let mut list_changed = false;
            for state in &mut states {
                if !state.event_state().intersects(State::CHANGED) {
                    continue;
                }
                if state.name() == PNP_NOTIFICATION() {
                    list_changed = true;
                } else {
                    self.reader_event(ctx, state);
                }
                state.sync_current_state();
            }

            if list_changed {
                self.refresh(ctx, &mut states)?;
            }
        }
        Ok(())
    }

    fn refresh(&mut self, ctx: &Context, states: &mut Vec<ReaderState>) -> Result<(), pcsc::Error> {
        let names: Vec<String> = match ctx.list_readers_owned() {
            Ok(names) => names
                .iter()
                .map(|name| name.to_string_lossy().into_owned())
                .filter(|name| self.config.accepts(name))
                .collect(),
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(err) => return Err(err),
        };

        let diff = diff_readers(self.readers.keys().map(String::as_str), &names);
        for name in &diff.removed {
            states.retain(|s| s.name().to_string_lossy() != name.as_str());
            self.detach(name);
        }
        for name in diff.added {
            let Ok(cname) = CString::new(name.as_str()) else {
                continue;
            };
            let link = self.registry.attach(&name);
            states.push(ReaderState::new(cname, State::UNAWARE));
            self.readers.insert(
                name,
                Tracked {
                    link,
                    presence: Presence::default(),
                },
            );
        }
        Ok(())
    }

    fn reader_event(&mut self, ctx: &Context, state: &ReaderState) {
        let name = state.name().to_string_lossy();
        let Some(tracked) = self.readers.get_mut(name.as_ref()) else {
            return;
        };

        let now = Presence::from_event(state.event_state(), state.event_count());
        match presence_transition(tracked.presence, now) {
            Some(Transition::Arrived) => {
                arrive(ctx, &self.registry, tracked, state, now);
            }
            Some(Transition::Departed) => {
                debug!(reader = %name, "Tag departed");
                depart(tracked, &name);
            }
            Some(Transition::Swapped) => {
                debug!(reader = %name, "Tag swapped");
                depart(tracked, &name);
                arrive(ctx, &self.registry, tracked, state, now);
            }
            None => tracked.presence.event_count = now.event_count,
        }
    }

    fn detach(&mut self, name: &str) {
        if let Some(tracked) = self.readers.remove(name) {
            if tracked.presence.present {
                let _ = tracked.link.blocking_card_removed();
            }
            self.registry.detach(name);
        }
    }

    fn detach_all(&mut self) {
        let names: Vec<String> = self.readers.keys().cloned().collect();
        for name in names {
            self.detach(&name);
        }
    }
}

fn arrive(
    ctx: &Context,
    registry: &ReaderRegistry<ReaderCard>,
    tracked: &mut Tracked,
    state: &ReaderState,
    now: Presence,
) {
    let name = state.name().to_string_lossy();
    let card = match ctx.connect(state.name(), ShareMode::Shared, Protocols::ANY) {
        Ok(card) => card,
        Err(err) => {
            warn!(reader = %name, error = %err, "Failed to connect to tag");
            registry.publish(OutboundMessage::error(format!("Failed to connect to tag: {err}")));
            return;
        }
    };
    let atr = state.atr().to_vec();
    debug!(reader = %name, atr = %hex::encode_upper(&atr), "Tag arrived");
    tracked.presence = now;
    let card = ReaderCard::Pcsc(PcscCard::new(card));
    if let Err(err) = tracked.link.blocking_card_inserted(card, atr) {
        warn!(reader = %name, error = %err, "Reader worker gone");
    }
}

fn depart(tracked: &mut Tracked, name: &str) {
    tracked.presence.present = false;
    if let Err(err) = tracked.link.blocking_card_removed() {
        warn!(reader = %name, error = %err, "Reader worker gone");
    }
}
