//! Cancellable one-shot deadlines on the tokio clock

use std::time::Duration;
use tokio::time::Instant;

/// A one-shot timer. Nothing runs on its own: the owner compares
/// [`Deadline::instant`] against the clock when it is woken.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Arm (or re-arm) the timer `after` from now
    pub fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// True once the deadline has passed
    pub fn is_due(&self, now: Instant) -> bool {
        self.at.is_some_and(|at| at <= now)
    }
}

/// Earliest of a set of optional instants
pub(crate) fn earliest<I>(instants: I) -> Option<Instant>
where
    I: IntoIterator<Item = Option<Instant>>,
{
    instants.into_iter().flatten().min()
}
