//! Strategy (C2): combines calculator outputs into a worker-count
//! recommendation with an explanation. The hybrid predictive strategy is the
//! only implementation shipped; the identifier is still plumbed through
//! config (`strategy`) so a deployment can swap it out without touching C3.

use crate::arrival_rate::ArrivalRateEstimator;
use crate::calculators::{backlog_drain, rate_law};
use chrono::{DateTime, Utc};
use domain::{QueueConfig, QueueKey, QueueMetrics, Recommendation};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendPolicy {
    Disabled,
    Hint,
    Moderate,
    Aggressive,
}

impl TrendPolicy {
    pub fn growth_factor(self) -> f64 {
        match self {
            TrendPolicy::Disabled => 1.0,
            TrendPolicy::Hint => 1.1,
            TrendPolicy::Moderate => 1.2,
            TrendPolicy::Aggressive => 1.3,
        }
    }
}

impl std::str::FromStr for TrendPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(TrendPolicy::Disabled),
            "hint" => Ok(TrendPolicy::Hint),
            "moderate" => Ok(TrendPolicy::Moderate),
            "aggressive" => Ok(TrendPolicy::Aggressive),
            other => Err(format!("unknown trend policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScalingSettings {
    pub fallback_job_time_seconds: f64,
    pub min_arrival_rate_confidence: f64,
    pub trend_policy: TrendPolicy,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            fallback_job_time_seconds: 2.0,
            min_arrival_rate_confidence: 0.5,
            trend_policy: TrendPolicy::Hint,
        }
    }
}

/// Capability set a strategy exposes: calculate target workers, with the
/// reason and prediction bundled into the return value rather than kept as
/// separate accessor methods (there is no shared mutable "last result").
pub trait Strategy: Send + Sync {
    fn recommend(
        &self,
        key: &QueueKey,
        metrics: &QueueMetrics,
        config: &QueueConfig,
        now: DateTime<Utc>,
    ) -> Recommendation;

    /// Forwarded to the arrival-rate estimator once per tick. Strategies
    /// without per-queue state can ignore this.
    fn prune_missing(&self, _present: &HashSet<QueueKey>) {}
}

pub struct HybridPredictiveStrategy {
    estimator: Mutex<ArrivalRateEstimator>,
    settings: ScalingSettings,
}

impl HybridPredictiveStrategy {
    pub fn new(settings: ScalingSettings) -> Self {
        Self {
            estimator: Mutex::new(ArrivalRateEstimator::new()),
            settings,
        }
    }
}

impl Strategy for HybridPredictiveStrategy {
    fn recommend(
        &self,
        key: &QueueKey,
        metrics: &QueueMetrics,
        config: &QueueConfig,
        now: DateTime<Utc>,
    ) -> Recommendation {
        let processing_rate = metrics.throughput_per_minute / 60.0;

        // 1. avg job time.
        let (avg_job_time, job_time_source) = if metrics.avg_job_duration_ms >= 10.0 {
            (metrics.avg_job_duration_ms / 1000.0, "measured")
        } else if metrics.active_workers > 0 && processing_rate > 0.0 {
            (
                (metrics.active_workers as f64 / processing_rate).min(600.0),
                "derived_from_workers",
            )
        } else {
            (self.settings.fallback_job_time_seconds, "fallback")
        };

        // 2. arrival rate, gated on estimator confidence.
        let estimate = self
            .estimator
            .lock()
            .unwrap()
            .estimate(key, metrics.pending, processing_rate, now);
        let (mut arrival_rate, mut arrival_source) =
            if estimate.confidence >= self.settings.min_arrival_rate_confidence {
                (estimate.rate, estimate.source.to_string())
            } else {
                (processing_rate, "processing_rate_fallback".to_string())
            };

        // 3. backlog-urgency synthesis; a handful of jobs is not evidence of
        // arrivals, so backlogs under 3 never synthesise.
        if arrival_rate <= 0.0 && metrics.pending >= 3 {
            let urgency = if metrics.oldest_job_age_sec > 0 {
                (metrics.oldest_job_age_sec as f64
                    / (config.max_pickup_time_sec as f64 / 2.0).max(1.0))
                .min(2.0)
            } else {
                1.0
            };
            arrival_rate = (metrics.pending as f64 / config.max_pickup_time_sec as f64) * urgency;
            arrival_source = "backlog_urgency".to_string();
        }

        // 4. three candidates.
        let rate_based = rate_law(arrival_rate, avg_job_time);
        let growth_factor = self.settings.trend_policy.growth_factor();
        let trend_based = rate_law(arrival_rate * growth_factor, avg_job_time);
        let backlog_based = backlog_drain(
            metrics.pending,
            metrics.oldest_job_age_sec,
            config.max_pickup_time_sec,
            avg_job_time,
            config.breach_threshold,
        );

        // 5. recommendation.
        let raw = rate_based.max(trend_based).max(backlog_based).max(0.0);
        let workers = raw.ceil() as u32;

        // 6. reason.
        let dominant = if backlog_based >= rate_based && backlog_based >= trend_based {
            "backlog-drain"
        } else if trend_based >= rate_based {
            "trend"
        } else {
            "rate-law"
        };
        let mut reason = format!(
            "{dominant} dominated (rate={rate_based:.2}, trend={trend_based:.2}, backlog={backlog_based:.2}); avg_job_time={avg_job_time:.2}s via {job_time_source}; arrival_rate={arrival_rate:.3}/s via {arrival_source}"
        );
        if (arrival_rate - processing_rate).abs() > 0.01 {
            if arrival_rate > processing_rate {
                reason.push_str("; backlog growing (arrival rate exceeds processing rate)");
            } else {
                reason.push_str("; backlog shrinking (arrival rate below processing rate)");
            }
        }

        // 7. predicted pickup time.
        let predicted_pickup_sec = if metrics.pending > 0 && workers > 0 {
            (metrics.pending as f64 / workers as f64) * avg_job_time
        } else {
            0.0
        };

        Recommendation {
            workers,
            reason,
            predicted_pickup_sec,
            arrival_rate_source: arrival_source,
        }
    }

    fn prune_missing(&self, present: &HashSet<QueueKey>) {
        self.estimator.lock().unwrap().prune_missing(present);
    }
}
