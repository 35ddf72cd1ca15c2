//! Engine (C3): applies capacity, per-queue config bounds and the policy
//! chain to a strategy recommendation, producing a committed Decision.

use crate::calculators::{capacity_breakdown, capacity_unavailable, CapacityInputs};
use crate::policy::PolicyChain;
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use domain::{CapacityBreakdown, Decision, LimitingFactor, QueueConfig, QueueKey, QueueMetrics};
use std::sync::Arc;

/// Host resource reading for one tick, already normalised into the units
/// the capacity calculator expects.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub total_cores: u32,
    pub reserve_cores: u32,
    pub max_cpu_percent: f64,
    pub current_cpu_percent: f64,
    pub total_memory_mb: u64,
    pub max_mem_percent: f64,
    pub current_mem_percent: f64,
    pub worker_mem_estimate_mb: u64,
}

pub struct Engine {
    strategy: Arc<dyn Strategy>,
    policies: PolicyChain,
}

impl Engine {
    pub fn new(strategy: Arc<dyn Strategy>, policies: PolicyChain) -> Self {
        Self { strategy, policies }
    }

    pub fn evaluate(
        &self,
        key: &QueueKey,
        metrics: &QueueMetrics,
        config: &QueueConfig,
        current_workers: u32,
        resources: Option<&ResourceSnapshot>,
        now: DateTime<Utc>,
    ) -> Decision {
        let rec = self.strategy.recommend(key, metrics, config, now);

        let capacity = match resources {
            Some(r) => capacity_breakdown(
                &CapacityInputs {
                    total_cores: r.total_cores,
                    reserve_cores: r.reserve_cores,
                    max_cpu_percent: r.max_cpu_percent,
                    current_cpu_percent: r.current_cpu_percent,
                    total_memory_mb: r.total_memory_mb,
                    max_mem_percent: r.max_mem_percent,
                    current_mem_percent: r.current_mem_percent,
                    worker_mem_estimate_mb: r.worker_mem_estimate_mb,
                },
                current_workers,
                i64::MAX,
            ),
            None => capacity_unavailable(),
        };

        let after_capacity = (rec.workers as i64).min(capacity.final_max).max(0) as u32;
        let target = after_capacity.clamp(config.min_workers, config.max_workers);

        let limiting_factor = Self::final_limiting_factor(
            target,
            after_capacity,
            rec.workers,
            config,
            &capacity,
        );

        let decision = Decision {
            queue_key: key.clone(),
            current_workers,
            target_workers: target,
            reason: rec.reason,
            predicted_pickup_sec: rec.predicted_pickup_sec,
            sla_target_sec: config.max_pickup_time_sec,
            capacity: CapacityBreakdown {
                final_max: target as i64,
                limiting_factor,
                ..capacity
            },
        };

        self.policies.run(decision)
    }

    fn final_limiting_factor(
        target: u32,
        after_capacity: u32,
        recommended: u32,
        config: &QueueConfig,
        capacity: &CapacityBreakdown,
    ) -> LimitingFactor {
        if target == config.max_workers && config.max_workers < after_capacity {
            LimitingFactor::Config
        } else if target == config.min_workers && after_capacity < target {
            LimitingFactor::Strategy
        } else if after_capacity < recommended {
            capacity.limiting_factor
        } else {
            LimitingFactor::Strategy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{HybridPredictiveStrategy, ScalingSettings};
    use domain::QueueMetrics;

    fn config(min: u32, max: u32) -> QueueConfig {
        QueueConfig {
            max_pickup_time_sec: 30,
            min_workers: min,
            max_workers: max,
            scale_cooldown_sec: 10,
            breach_threshold: 0.5,
        }
    }

    fn metrics(pending: u64, throughput_per_min: f64, active: u32) -> QueueMetrics {
        QueueMetrics {
            pending,
            oldest_job_age_sec: 0,
            throughput_per_minute: throughput_per_min,
            avg_job_duration_ms: 1000.0,
            active_workers: active,
            measured_at: Utc::now(),
        }
    }

    fn engine() -> Engine {
        Engine::new(
            Arc::new(HybridPredictiveStrategy::new(ScalingSettings::default())),
            PolicyChain::empty(),
        )
    }

    #[test]
    fn bounds_are_respected() {
        // S6 — strategy recommends far more than capacity and config allow.
        let e = engine();
        let key = QueueKey::new("redis", "default");
        let resources = ResourceSnapshot {
            total_cores: 4,
            reserve_cores: 0,
            max_cpu_percent: 10.0,
            current_cpu_percent: 0.0,
            total_memory_mb: 1_000,
            max_mem_percent: 10.0,
            current_mem_percent: 0.0,
            worker_mem_estimate_mb: 10_000, // forces memory to be the binding factor
        };
        // Throughput of 3000/min = 50/s * 1s avg job time => recommend ~50 workers.
        let decision = e.evaluate(
            &key,
            &metrics(0, 3000.0, 8),
            &config(1, 30),
            8,
            Some(&resources),
            Utc::now(),
        );
        assert!(decision.target_workers <= 30);
        assert!(decision.target_workers as i64 <= decision.capacity.final_max.max(decision.target_workers as i64));
    }

    #[test]
    fn low_demand_below_min_is_flagged_strategy_not_capacity() {
        let e = engine();
        let key = QueueKey::new("redis", "default");
        let resources = ResourceSnapshot {
            total_cores: 16,
            reserve_cores: 0,
            max_cpu_percent: 90.0,
            current_cpu_percent: 5.0,
            total_memory_mb: 64_000,
            max_mem_percent: 90.0,
            current_mem_percent: 5.0,
            worker_mem_estimate_mb: 256,
        };
        let decision = e.evaluate(
            &key,
            &metrics(0, 0.0, 0),
            &config(5, 20),
            0,
            Some(&resources),
            Utc::now(),
        );
        assert_eq!(decision.target_workers, 5);
        assert_eq!(decision.capacity.limiting_factor, LimitingFactor::Strategy);
    }

    #[test]
    fn config_max_below_capacity_is_flagged_config() {
        let e = engine();
        let key = QueueKey::new("redis", "default");
        let resources = ResourceSnapshot {
            total_cores: 64,
            reserve_cores: 0,
            max_cpu_percent: 95.0,
            current_cpu_percent: 1.0,
            total_memory_mb: 256_000,
            max_mem_percent: 95.0,
            current_mem_percent: 1.0,
            worker_mem_estimate_mb: 128,
        };
        // Huge recommendation, huge capacity, but config.max caps it at 3.
        let decision = e.evaluate(
            &key,
            &metrics(0, 6000.0, 3),
            &config(1, 3),
            3,
            Some(&resources),
            Utc::now(),
        );
        assert_eq!(decision.target_workers, 3);
        assert_eq!(decision.capacity.limiting_factor, LimitingFactor::Config);
    }
}
