//! Completion counter for dispatched jobs.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::emit;
use crate::metrics::events::BatchProgress;

/// Monotonic `completed/total` indicator.
///
/// Observational only: ticking never influences control flow. When disabled
/// the counter still advances but nothing is logged.
#[derive(Debug)]
pub struct Progress {
    target: String,
    total: usize,
    completed: AtomicUsize,
    enabled: bool,
}

impl Progress {
    pub fn new(target: impl Into<String>, total: usize, enabled: bool) -> Self {
        Self {
            target: target.into(),
            total,
            completed: AtomicUsize::new(0),
            enabled,
        }
    }

    /// Record one finished job and return the new completed count.
    pub fn tick(&self) -> usize {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;

        if self.enabled {
            emit!(BatchProgress {
                completed,
                total: self.total,
                target: self.target.clone(),
            });
            info!(
                target = %self.target,
                completed,
                total = self.total,
                "Batches completed {completed}/{}",
                self.total
            );
        }

        completed
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_monotonic() {
        let progress = Progress::new("test", 3, true);
        let seen: Vec<usize> = (0..3).map(|_| progress.tick()).collect();

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(progress.completed(), progress.total());
    }

    #[test]
    fn test_disabled_still_counts() {
        let progress = Progress::new("test", 2, false);
        progress.tick();
        assert_eq!(progress.completed(), 1);
    }
}
