//! Arrival-rate estimation (C1's subtlest calculator, backed by C8's state).
//!
//! Arrival rate diverges from processing rate exactly when it matters most:
//! during a spike, processing rate lags the true rate of new work becoming
//! eligible, so feeding it straight into Little's Law under-provisions right
//! when load is rising.

use chrono::{DateTime, Utc};
use domain::{ArrivalEstimate, QueueKey};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    backlog: u64,
    observed_at: DateTime<Utc>,
    missed_cycles: u32,
}

/// Owns the QueueKey -> {lastBacklog, lastObservedAt} mapping (C8). Mutated
/// only by `estimate`, once per queue per tick; never shared across queues.
#[derive(Default)]
pub struct ArrivalRateEstimator {
    state: HashMap<QueueKey, Snapshot>,
}

impl ArrivalRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate(
        &mut self,
        key: &QueueKey,
        current_backlog: u64,
        processing_rate: f64,
        now: DateTime<Utc>,
    ) -> ArrivalEstimate {
        let estimate = match self.state.get(key) {
            None => ArrivalEstimate {
                rate: processing_rate,
                confidence: 0.3,
                source: "no_history",
            },
            Some(prior) => {
                let interval = (now - prior.observed_at).num_milliseconds() as f64 / 1000.0;
                if interval < 1.0 {
                    ArrivalEstimate {
                        rate: processing_rate,
                        confidence: 0.3,
                        source: "interval_too_short",
                    }
                } else if interval > 60.0 {
                    ArrivalEstimate {
                        rate: processing_rate,
                        confidence: 0.4,
                        source: "history_stale",
                    }
                } else {
                    let backlog_delta = current_backlog as f64 - prior.backlog as f64;
                    let backlog_growth = backlog_delta / interval;
                    let arrival_rate = (processing_rate + backlog_growth).max(0.0);

                    let base_confidence = if (5.0..=30.0).contains(&interval) {
                        0.9
                    } else if (2.0..=60.0).contains(&interval) {
                        0.7
                    } else {
                        0.5
                    };
                    let noise_factor = if backlog_delta.abs() < 3.0 {
                        0.6
                    } else {
                        0.7 + 0.3 * (backlog_delta.abs() / 10.0).min(1.0)
                    };

                    ArrivalEstimate {
                        rate: arrival_rate,
                        confidence: base_confidence * noise_factor,
                        source: "measured",
                    }
                }
            }
        };

        self.state.insert(
            key.clone(),
            Snapshot {
                backlog: current_backlog,
                observed_at: now,
                missed_cycles: 0,
            },
        );

        estimate
    }

    /// Evict entries for queues absent from `present` for more than one
    /// cycle. Call once per tick after the full metrics fetch.
    pub fn prune_missing(&mut self, present: &HashSet<QueueKey>) {
        self.state.retain(|key, snapshot| {
            if present.contains(key) {
                true
            } else {
                snapshot.missed_cycles += 1;
                snapshot.missed_cycles <= 1
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key() -> QueueKey {
        QueueKey::new("redis", "default")
    }

    #[test]
    fn no_history_falls_back_to_processing_rate() {
        let mut est = ArrivalRateEstimator::new();
        let r = est.estimate(&key(), 10, 4.0, Utc::now());
        assert_eq!(r.rate, 4.0);
        assert_eq!(r.confidence, 0.3);
        assert_eq!(r.source, "no_history");
    }

    #[test]
    fn interval_too_short_falls_back() {
        let mut est = ArrivalRateEstimator::new();
        let t0 = Utc::now();
        est.estimate(&key(), 10, 4.0, t0);
        let r = est.estimate(&key(), 12, 4.0, t0 + Duration::milliseconds(500));
        assert_eq!(r.source, "interval_too_short");
        assert_eq!(r.confidence, 0.3);
    }

    #[test]
    fn history_stale_falls_back() {
        let mut est = ArrivalRateEstimator::new();
        let t0 = Utc::now();
        est.estimate(&key(), 10, 4.0, t0);
        let r = est.estimate(&key(), 12, 4.0, t0 + Duration::seconds(61));
        assert_eq!(r.source, "history_stale");
        assert_eq!(r.confidence, 0.4);
    }

    #[test]
    fn measured_confidence_band_5_to_30() {
        let mut est = ArrivalRateEstimator::new();
        let t0 = Utc::now();
        est.estimate(&key(), 10, 4.0, t0);
        // backlog grows by 20 over 10s -> delta=20 >= 3, noise_factor = 1.0
        let r = est.estimate(&key(), 30, 4.0, t0 + Duration::seconds(10));
        assert_eq!(r.source, "measured");
        assert!((r.confidence - 0.9).abs() < 1e-9);
        assert!((r.rate - (4.0 + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn small_backlog_delta_is_treated_as_noise() {
        let mut est = ArrivalRateEstimator::new();
        let t0 = Utc::now();
        est.estimate(&key(), 10, 4.0, t0);
        // delta = 1 < 3 -> noise factor 0.6, still in the [5,30] band -> 0.9*0.6
        let r = est.estimate(&key(), 11, 4.0, t0 + Duration::seconds(10));
        assert!((r.confidence - 0.54).abs() < 1e-9);
    }

    #[test]
    fn arrival_rate_never_negative() {
        let mut est = ArrivalRateEstimator::new();
        let t0 = Utc::now();
        est.estimate(&key(), 30, 1.0, t0);
        // backlog shrinks a lot relative to processing rate
        let r = est.estimate(&key(), 0, 1.0, t0 + Duration::seconds(10));
        assert!(r.rate >= 0.0);
    }

    #[test]
    fn prune_removes_after_two_consecutive_misses() {
        let mut est = ArrivalRateEstimator::new();
        let t0 = Utc::now();
        est.estimate(&key(), 10, 4.0, t0);
        let present: HashSet<QueueKey> = HashSet::new();
        est.prune_missing(&present); // miss 1, kept
        assert!(est.state.contains_key(&key()));
        est.prune_missing(&present); // miss 2, evicted
        assert!(!est.state.contains_key(&key()));
    }
}
