use crate::domain::models::{CalendarRange, SyncState, SyncStatus};
use chrono::{DateTime, Utc};

/// Proof that a fetch was started; only the newest ticket may settle the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTicket {
    pub generation: u64,
    pub range: CalendarRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    Started(SyncTicket),
    Coalesced,
}

#[derive(Debug, Default)]
pub struct SyncStatusTracker {
    state: SyncState,
    latest_generation: u64,
    in_flight: Option<CalendarRange>,
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.status
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest_generation
    }

    pub fn begin(&mut self, range: CalendarRange) -> BeginOutcome {
        if self.state.status == SyncStatus::Syncing && self.in_flight == Some(range) {
            return BeginOutcome::Coalesced;
        }

        self.latest_generation = self.latest_generation.saturating_add(1);
        self.in_flight = Some(range);
        self.state.status = SyncStatus::Syncing;
        BeginOutcome::Started(SyncTicket {
            generation: self.latest_generation,
            range,
        })
    }

    pub fn is_current(&self, ticket: &SyncTicket) -> bool {
        ticket.generation == self.latest_generation && self.state.status == SyncStatus::Syncing
    }

    /// Returns `false` when the ticket was superseded and the result must be discarded.
    pub fn complete(&mut self, ticket: &SyncTicket, finished_at: DateTime<Utc>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.in_flight = None;
        self.state = SyncState {
            status: SyncStatus::Idle,
            last_synced_at: Some(finished_at),
            error_message: None,
        };
        true
    }

    /// Failure keeps the last successful sync time so the UI can show how stale it is.
    pub fn fail(&mut self, ticket: &SyncTicket, message: impl Into<String>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.in_flight = None;
        self.state.status = SyncStatus::Error;
        self.state.error_message = Some(message.into());
        true
    }
}
