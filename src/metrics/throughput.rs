//! Throughput tracking for block draining

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputStats {
    pub pairs_evaluated: u64,
    pub blocks_processed: u64,
    pub pairs_per_second: f64,
}

/// Throughput monitor for periodic logging. Callers pass their own running
/// totals; nothing here is global.
pub struct ThroughputMonitor {
    start: Instant,
    last_log: Instant,
    log_interval: Duration,
    last_pairs: u64,
}

impl ThroughputMonitor {
    pub fn new(log_interval: Duration) -> Self {
        let now = Instant::now();
        Self { start: now, last_log: now, log_interval, last_pairs: 0 }
    }

    /// Logs and returns throughput once per interval.
    pub fn check_and_log(&mut self, pairs_evaluated: u64, blocks_processed: u64) -> Option<ThroughputStats> {
        let now = Instant::now();
        if now.duration_since(self.last_log) < self.log_interval { return None; }
        let window = now.duration_since(self.last_log).as_secs_f64();
        self.last_log = now;
        let since_last = pairs_evaluated.saturating_sub(self.last_pairs);
        self.last_pairs = pairs_evaluated;
        let stats = ThroughputStats {
            pairs_evaluated,
            blocks_processed,
            pairs_per_second: if window > 0.0 { since_last as f64 / window } else { 0.0 },
        };
        log::info!(
            "Throughput: {:.0} pairs/sec (total: {} pairs, {} blocks, elapsed {:.1}s)",
            stats.pairs_per_second, pairs_evaluated, blocks_processed, self.start.elapsed().as_secs_f64()
        );
        Some(stats)
    }

    /// Average pairs/sec since the monitor was created.
    pub fn overall_rate(&self, pairs_evaluated: u64) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if secs > 0.0 { pairs_evaluated as f64 / secs } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_gating() {
        let mut mon = ThroughputMonitor::new(Duration::from_secs(3600));
        assert!(mon.check_and_log(100, 1).is_none());

        let mut mon = ThroughputMonitor::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        let stats = mon.check_and_log(1000, 2).unwrap();
        assert_eq!(stats.pairs_evaluated, 1000);
        assert!(stats.pairs_per_second > 0.0);
        let again = mon.check_and_log(1000, 2).unwrap();
        assert_eq!(again.pairs_per_second, 0.0);
    }
}
