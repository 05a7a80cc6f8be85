//! Save scheduling for the page being edited.
//!
//! The coordinator never performs I/O. The event loop feeds it edits and
//! ticks, it answers with [`SaveRequest`]s, and the loop reports each
//! request's result back through [`AutosaveCoordinator::complete`]. At most
//! one request is outstanding at a time.

use std::time::{Duration, Instant};

use uuid::Uuid;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before an automatic save.
    pub debounce: Duration,
    /// Safety flush period while the user keeps typing.
    pub flush_interval: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

fn secs_from_env(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                tracing::warn!("Ignoring {}={:?}, expected whole seconds > 0", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl AutosaveConfig {
    pub fn from_env() -> Self {
        Self {
            debounce: secs_from_env("DEUS_AUTOSAVE_DEBOUNCE_SECS", DEFAULT_DEBOUNCE),
            flush_interval: secs_from_env("DEUS_AUTOSAVE_FLUSH_SECS", DEFAULT_FLUSH_INTERVAL),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Clean,
    Dirty,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Debounce,
    Periodic,
    Manual,
    Navigation,
}

impl SaveTrigger {
    pub fn is_automatic(self) -> bool {
        matches!(self, Self::Debounce | Self::Periodic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub page_id: Uuid,
    pub revision: u64,
    pub content: String,
    pub trigger: SaveTrigger,
}

/// Answer to an explicit save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualSave {
    /// The user cannot edit this page.
    Denied,
    NothingToSave,
    /// The save already in flight carries the latest content.
    Coalesced,
    /// A save is in flight with older content; another one follows it.
    Queued,
    Issued(SaveRequest),
}

/// What the UI should hear about a finished save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub trigger: SaveTrigger,
    pub revision: u64,
    pub error: Option<String>,
    /// True when the user asked for this save (directly or by coalescing),
    /// so success gets visible feedback too.
    pub announce: bool,
}

/// What becomes of unsent edits when the editor closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSave {
    /// Everything is saved or already on its way.
    Nothing,
    Send(SaveRequest),
    /// Newer edits wait behind the save in flight. Keep the coordinator,
    /// report that save through [`AutosaveCoordinator::complete`] and ask
    /// again.
    Behind,
    /// The user may no longer edit; the edits cannot be sent.
    Denied,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    revision: u64,
    trigger: SaveTrigger,
}

#[derive(Debug)]
pub struct AutosaveCoordinator {
    config: AutosaveConfig,
    page_id: Uuid,
    enabled: bool,
    content: String,
    revision: u64,
    saved_revision: u64,
    in_flight: Option<InFlight>,
    debounce_at: Option<Instant>,
    next_flush: Instant,
    manual_queued: bool,
    manual_waiting: bool,
}

impl AutosaveCoordinator {
    pub fn new(
        page_id: Uuid,
        content: String,
        config: AutosaveConfig,
        enabled: bool,
        now: Instant,
    ) -> Self {
        Self {
            config,
            page_id,
            enabled,
            content,
            revision: 0,
            saved_revision: 0,
            in_flight: None,
            debounce_at: None,
            next_flush: now + config.flush_interval,
            manual_queued: false,
            manual_waiting: false,
        }
    }

    pub fn page_id(&self) -> Uuid {
        self.page_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_dirty(&self) -> bool {
        self.revision > self.saved_revision
    }

    pub fn state(&self) -> SaveState {
        if self.in_flight.is_some() {
            SaveState::Saving
        } else if self.is_dirty() {
            SaveState::Dirty
        } else {
            SaveState::Clean
        }
    }

    /// Revision carried by the outstanding request, if any.
    pub fn in_flight_revision(&self) -> Option<u64> {
        self.in_flight.map(|f| f.revision)
    }

    /// Turning autosave off cancels the pending debounce; manual saves keep
    /// working.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.debounce_at = None;
        }
    }

    /// Record the editor's latest content and restart the debounce window.
    pub fn edit(&mut self, content: String, now: Instant) {
        if content == self.content {
            return;
        }
        self.content = content;
        self.revision += 1;
        self.debounce_at = Some(now + self.config.debounce);
    }

    fn issue(&mut self, trigger: SaveTrigger) -> SaveRequest {
        self.in_flight = Some(InFlight {
            revision: self.revision,
            trigger,
        });
        self.debounce_at = None;
        self.manual_queued = false;

        tracing::debug!(page = %self.page_id, revision = self.revision, ?trigger, "Issuing save");

        SaveRequest {
            page_id: self.page_id,
            revision: self.revision,
            content: self.content.clone(),
            trigger,
        }
    }

    /// Called on every tick. Returns a request when a deadline is due.
    pub fn poll(&mut self, now: Instant, can_edit: bool) -> Option<SaveRequest> {
        if !can_edit {
            self.debounce_at = None;
            self.manual_queued = false;
            return None;
        }

        // Deadlines stay armed while a save is out; they fire once it lands.
        if self.in_flight.is_some() {
            return None;
        }

        if self.manual_queued && self.is_dirty() {
            self.manual_waiting = true;
            return Some(self.issue(SaveTrigger::Manual));
        }
        self.manual_queued = false;

        if self.enabled && self.is_dirty() && self.debounce_at.is_some_and(|at| now >= at) {
            return Some(self.issue(SaveTrigger::Debounce));
        }

        if now >= self.next_flush {
            self.next_flush = now + self.config.flush_interval;
            if self.enabled && self.is_dirty() {
                return Some(self.issue(SaveTrigger::Periodic));
            }
        }

        None
    }

    pub fn save_now(&mut self, can_edit: bool) -> ManualSave {
        if !can_edit {
            return ManualSave::Denied;
        }

        if let Some(in_flight) = self.in_flight {
            if in_flight.revision == self.revision {
                self.manual_waiting = true;
                return ManualSave::Coalesced;
            }
            self.manual_queued = true;
            return ManualSave::Queued;
        }

        if !self.is_dirty() {
            return ManualSave::NothingToSave;
        }

        self.manual_waiting = true;
        ManualSave::Issued(self.issue(SaveTrigger::Manual))
    }

    /// Report the result of the request carrying `revision`. Results for
    /// anything but the outstanding request are ignored.
    pub fn complete(&mut self, revision: u64, result: Result<(), String>) -> Option<SaveOutcome> {
        let in_flight = self.in_flight.filter(|f| f.revision == revision)?;
        self.in_flight = None;

        if result.is_ok() {
            self.saved_revision = self.saved_revision.max(revision);
        }

        // A queued manual save is still owed feedback.
        let announce = in_flight.trigger == SaveTrigger::Manual || self.manual_waiting;
        if !self.manual_queued {
            self.manual_waiting = false;
        }

        Some(SaveOutcome {
            trigger: in_flight.trigger,
            revision,
            error: result.err(),
            announce,
        })
    }

    /// Final save when leaving the page.
    pub fn take_pending(&mut self, can_edit: bool) -> PendingSave {
        if !self.is_dirty() {
            return PendingSave::Nothing;
        }
        if !can_edit {
            self.debounce_at = None;
            self.manual_queued = false;
            return PendingSave::Denied;
        }
        match self.in_flight {
            Some(in_flight) if in_flight.revision == self.revision => PendingSave::Nothing,
            Some(_) => PendingSave::Behind,
            None => PendingSave::Send(self.issue(SaveTrigger::Navigation)),
        }
    }
}
