//! Synthetic diagnostic telemetry
//!
//! The controller has no radio or heap counters to report, so it publishes
//! plausible jittered values. Telemetry is independent of command traffic and
//! best-effort on the wire.

use crosslight_shared::Telemetry;
use rand::Rng;

/// Produces periodic diagnostic samples
pub struct TelemetrySource {
    started_ms: u64,
}

impl TelemetrySource {
    pub fn new(started_ms: u64) -> Self {
        Self { started_ms }
    }

    /// One jittered diagnostic sample
    pub fn sample(&self, now_ms: u64) -> Telemetry {
        let mut rng = rand::thread_rng();
        Telemetry {
            rssi_dbm: rng.gen_range(-75..=-45),
            heap_free_kb: rng.gen_range(140..=220),
            uptime_s: now_ms.saturating_sub(self.started_ms) / 1000,
            ts_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_ranges() {
        let source = TelemetrySource::new(1000);
        for _ in 0..100 {
            let t = source.sample(61_000);
            assert!((-75..=-45).contains(&t.rssi_dbm));
            assert!((140..=220).contains(&t.heap_free_kb));
            assert_eq!(t.uptime_s, 60);
            assert_eq!(t.ts_ms, 61_000);
        }
    }
}
