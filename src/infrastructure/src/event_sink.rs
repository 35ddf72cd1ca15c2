//! EventSink (consumed, §6): the default sink writes structured log lines.
//! `publish` must never suspend the control loop, so this is synchronous and
//! merely formats + logs; a deployment that wants a real broker swaps this
//! adapter out without touching the manager.

use domain::{EventSink, ScalingEvent};
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: ScalingEvent) {
        match event {
            ScalingEvent::ScalingDecisionMade { decision } => {
                info!(
                    queue = %decision.queue_key,
                    current = decision.current_workers,
                    target = decision.target_workers,
                    action = %decision.action(),
                    limiting_factor = %decision.capacity.limiting_factor,
                    reason = %decision.reason,
                    "scaling decision made"
                );
            }
            ScalingEvent::WorkersScaled {
                queue_key,
                from,
                to,
                action,
                reason,
            } => {
                info!(
                    queue = %queue_key,
                    from,
                    to,
                    action = %action,
                    reason,
                    "workers scaled"
                );
            }
            ScalingEvent::SlaBreachPredicted {
                queue_key,
                predicted_pickup_sec,
                sla_target_sec,
            } => {
                warn!(
                    queue = %queue_key,
                    predicted_pickup_sec,
                    sla_target_sec,
                    "sla breach predicted"
                );
            }
            ScalingEvent::SlaRecovered { queue_key } => {
                info!(queue = %queue_key, "sla recovered");
            }
        }
    }
}
