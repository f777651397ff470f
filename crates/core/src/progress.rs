//! Progress estimation and persistence throttling for running jobs.
//!
//! The engine gives no progress signal of its own, so progress is a
//! heuristic derived from the job phase and, while streaming, from the
//! number of events received so far.

// ---------------------------------------------------------------------------
// Phase bands
// ---------------------------------------------------------------------------

/// Progress at submission.
pub const SUBMITTED: i16 = 0;
/// Progress once the external call has been issued.
pub const ACCEPTED: i16 = 25;
/// Progress once the external call has returned (or the stream summarized).
pub const RETURNED: i16 = 75;
/// Progress after the terminal write.
pub const FINALIZED: i16 = 100;

/// Fraction of the streaming band credited per received event.
pub const STREAM_FRACTION_PER_EVENT: f64 = 0.05;
/// Streaming credit saturates here so that only the return phase reaches
/// [`RETURNED`].
pub const STREAM_FRACTION_CAP: f64 = 0.9;
/// Width of the band between [`ACCEPTED`] and [`RETURNED`].
const STREAM_BAND: f64 = (RETURNED - ACCEPTED) as f64;

/// Where a job is in its lifecycle, as far as progress is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Submitted,
    Accepted,
    Streaming { events: u64 },
    Returned,
    Finalized,
}

/// Map a phase to a progress percentage.
pub fn estimate(phase: Phase) -> i16 {
    match phase {
        Phase::Submitted => SUBMITTED,
        Phase::Accepted => ACCEPTED,
        Phase::Streaming { events } => {
            let fraction = (events as f64 * STREAM_FRACTION_PER_EVENT).min(STREAM_FRACTION_CAP);
            ACCEPTED + (fraction * STREAM_BAND).floor() as i16
        }
        Phase::Returned => RETURNED,
        Phase::Finalized => FINALIZED,
    }
}

// ---------------------------------------------------------------------------
// Monotonic tracker
// ---------------------------------------------------------------------------

/// Keeps the reported progress of one job non-decreasing.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    current: i16,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> i16 {
        self.current
    }

    /// Advance to `phase`. Returns the new value only when it increased.
    pub fn advance(&mut self, phase: Phase) -> Option<i16> {
        let next = estimate(phase);
        if next > self.current {
            self.current = next;
            Some(next)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence throttling
// ---------------------------------------------------------------------------

/// Default number of events between intermediate log writes.
pub const DEFAULT_PERSIST_EVERY: u64 = 100;

/// Decides when an intermediate log snapshot is written to the store.
#[derive(Debug, Clone, Copy)]
pub struct PersistPolicy {
    pub every: u64,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            every: DEFAULT_PERSIST_EVERY,
        }
    }
}

impl PersistPolicy {
    /// True on every `every`-th event and on milestone events.
    pub fn should_persist(&self, events_seen: u64, milestone: bool) -> bool {
        milestone || (self.every > 0 && events_seen % self.every == 0)
    }
}
