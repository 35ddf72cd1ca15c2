//! Policy chain (C4): an ordered pipeline of before/after hooks. `before`
//! may rewrite the decision threaded forward to the next policy; `after` is
//! side-effect only and never alters it. A policy that throws must not
//! abort the chain — the executor catches, logs, and continues with the
//! decision as it stood before that policy ran.

use domain::{Action, Decision, EventSink, ScalingEvent};
use std::sync::Arc;
use tracing::warn;

pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    fn before(&self, decision: Decision) -> anyhow::Result<Decision> {
        Ok(decision)
    }

    fn after(&self, _decision: &Decision) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Prevents thrash when one large downward step would be taken: never
/// removes more than one worker per tick.
pub struct ConservativeScaleDown;

impl Policy for ConservativeScaleDown {
    fn name(&self) -> &str {
        "conservative-scale-down"
    }

    fn before(&self, mut decision: Decision) -> anyhow::Result<Decision> {
        if decision.action() == Action::ScaleDown && decision.workers_to_remove() > 1 {
            let original_reason = decision.reason.clone();
            decision.target_workers = decision.current_workers.saturating_sub(1);
            decision.reason = format!("conservative-scale-down: {original_reason}");
        }
        Ok(decision)
    }
}

/// For critical queues: never scale down at all.
pub struct NoScaleDown;

impl Policy for NoScaleDown {
    fn name(&self) -> &str {
        "no-scale-down"
    }

    fn before(&self, mut decision: Decision) -> anyhow::Result<Decision> {
        if decision.action() == Action::ScaleDown {
            let original_reason = decision.reason.clone();
            decision.target_workers = decision.current_workers;
            decision.reason = format!("no-scale-down: {original_reason}");
        }
        Ok(decision)
    }
}

/// After-only: emits a warning whenever the committed decision predicts a
/// pickup time over the SLA target or within 90% of it. Fires every tick the
/// condition holds, not just on the edge — duplicates are harmless under
/// at-least-once delivery.
pub struct BreachNotification {
    sink: Arc<dyn EventSink>,
}

impl BreachNotification {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

impl Policy for BreachNotification {
    fn name(&self) -> &str {
        "breach-notification"
    }

    fn after(&self, decision: &Decision) -> anyhow::Result<()> {
        let utilization = if decision.sla_target_sec > 0 {
            decision.predicted_pickup_sec / decision.sla_target_sec as f64
        } else {
            0.0
        };
        if decision.is_breaching() || utilization >= 0.9 {
            self.sink.publish(ScalingEvent::SlaBreachPredicted {
                queue_key: decision.queue_key.clone(),
                predicted_pickup_sec: decision.predicted_pickup_sec,
                sla_target_sec: decision.sla_target_sec,
            });
        }
        Ok(())
    }
}

pub struct PolicyChain {
    policies: Vec<Arc<dyn Policy>>,
}

impl PolicyChain {
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self { policies }
    }

    pub fn empty() -> Self {
        Self { policies: Vec::new() }
    }

    /// Runs every `before` hook in order, threading the latest decision
    /// forward, then every `after` hook over the final committed decision.
    pub fn run(&self, mut decision: Decision) -> Decision {
        for policy in &self.policies {
            match policy.before(decision.clone()) {
                Ok(updated) => decision = updated,
                Err(err) => {
                    warn!(policy = policy.name(), error = %err, "policy before() failed, keeping prior decision");
                }
            }
        }
        for policy in &self.policies {
            if let Err(err) = policy.after(&decision) {
                warn!(policy = policy.name(), error = %err, "policy after() failed");
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CapacityBreakdown, LimitingFactor, QueueKey};

    fn decision(current: u32, target: u32) -> Decision {
        Decision {
            queue_key: QueueKey::new("redis", "default"),
            current_workers: current,
            target_workers: target,
            reason: "test".to_string(),
            predicted_pickup_sec: 0.0,
            sla_target_sec: 30,
            capacity: CapacityBreakdown {
                max_by_cpu: 20,
                max_by_memory: 20,
                max_by_config: 20,
                final_max: target as i64,
                limiting_factor: LimitingFactor::Strategy,
            },
        }
    }

    #[test]
    fn conservative_scale_down_caps_at_one_worker_removed() {
        // S5 — current=10, recommended target=2
        let chain = PolicyChain::new(vec![Arc::new(ConservativeScaleDown)]);
        let committed = chain.run(decision(10, 2));
        assert_eq!(committed.target_workers, 9);
        assert!(committed.reason.contains("conservative-scale-down"));
    }

    #[test]
    fn no_scale_down_holds_current_count() {
        let chain = PolicyChain::new(vec![Arc::new(NoScaleDown)]);
        let committed = chain.run(decision(10, 2));
        assert_eq!(committed.target_workers, 10);
    }

    #[test]
    fn throwing_policy_does_not_abort_chain() {
        struct Exploding;
        impl Policy for Exploding {
            fn name(&self) -> &str {
                "exploding"
            }
            fn before(&self, _decision: Decision) -> anyhow::Result<Decision> {
                anyhow::bail!("boom")
            }
        }

        let chain = PolicyChain::new(vec![
            Arc::new(Exploding),
            Arc::new(ConservativeScaleDown),
        ]);
        let committed = chain.run(decision(10, 2));
        // Exploding left the decision untouched; conservative-scale-down still ran.
        assert_eq!(committed.target_workers, 9);
    }

    struct RecordingSink {
        events: std::sync::Mutex<Vec<ScalingEvent>>,
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: ScalingEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn breach_notification_fires_when_over_sla() {
        let sink = Arc::new(RecordingSink {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let chain = PolicyChain::new(vec![Arc::new(BreachNotification::new(sink.clone()))]);
        let mut d = decision(5, 5);
        d.predicted_pickup_sec = 40.0; // > sla_target_sec (30)
        chain.run(d);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn breach_notification_silent_when_within_sla() {
        let sink = Arc::new(RecordingSink {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let chain = PolicyChain::new(vec![Arc::new(BreachNotification::new(sink.clone()))]);
        let mut d = decision(5, 5);
        d.predicted_pickup_sec = 5.0;
        chain.run(d);
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
