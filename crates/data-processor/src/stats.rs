//! Processing counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the processing counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub total_processed: u64,
    pub valid_data: u64,
    pub invalid_data: u64,
    /// valid / total, 0.0 before anything was processed
    pub success_rate: f64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    valid: AtomicU64,
    invalid: AtomicU64,
}

impl StatsCounters {
    pub fn record_valid(&self) {
        self.valid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProcessingStats {
        let valid_data = self.valid.load(Ordering::Relaxed);
        let invalid_data = self.invalid.load(Ordering::Relaxed);
        let total_processed = valid_data + invalid_data;
        let success_rate = if total_processed == 0 {
            0.0
        } else {
            valid_data as f64 / total_processed as f64
        };
        ProcessingStats {
            total_processed,
            valid_data,
            invalid_data,
            success_rate,
        }
    }

    pub fn reset(&self) {
        self.valid.store(0, Ordering::Relaxed);
        self.invalid.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let counters = StatsCounters::default();
        assert_eq!(counters.snapshot().success_rate, 0.0);

        counters.record_valid();
        counters.record_valid();
        counters.record_valid();
        counters.record_invalid();
        let stats = counters.snapshot();
        assert_eq!(stats.total_processed, 4);
        assert_eq!(stats.success_rate, 0.75);

        counters.reset();
        assert_eq!(counters.snapshot().total_processed, 0);
    }
}
