//! Task Timing
//!
//! Debug-level duration logging around pipeline stages.

use std::time::Instant;

pub struct ScopeTimer {
    label: &'static str,
    start: Instant,
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        log::debug!("{}: {:.3?}", self.label, self.start.elapsed());
    }
}

/// Logs the elapsed time of the enclosing scope when dropped.
#[must_use]
pub fn scope_timer(label: &'static str) -> ScopeTimer {
    ScopeTimer {
        label,
        start: Instant::now(),
    }
}
