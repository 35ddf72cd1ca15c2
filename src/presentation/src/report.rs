//! Plain-text rendering of decisions and events for the CLI's foreground
//! output. Not a TUI or a dashboard — the CLI is not the core, and the
//! specification excludes interactive dashboards outright.

use colored::Colorize;
use domain::{Action, Decision, LimitingFactor, ScalingEvent};

pub fn format_decision_report(decision: &Decision) -> String {
    let action_label = match decision.action() {
        Action::ScaleUp => "scale up".green(),
        Action::ScaleDown => "scale down".yellow(),
        Action::Hold => "hold".normal(),
    };

    let mut report = format!(
        "{} {} -> {} ({action_label})\n",
        decision.queue_key.to_string().bold(),
        decision.current_workers,
        decision.target_workers,
    );
    report.push_str(&format!("  reason: {}\n", decision.reason));
    report.push_str(&format!(
        "  predicted pickup: {:.1}s (sla {}s)\n",
        decision.predicted_pickup_sec, decision.sla_target_sec
    ));
    let limiting = format!("{}", decision.capacity.limiting_factor);
    let limiting = match decision.capacity.limiting_factor {
        LimitingFactor::Unavailable => limiting.red(),
        LimitingFactor::Config | LimitingFactor::Cpu | LimitingFactor::Memory => limiting.yellow(),
        LimitingFactor::Strategy => limiting.normal(),
    };
    report.push_str(&format!(
        "  capacity: cpu={} memory={} config={} final={} limiting={}\n",
        decision.capacity.max_by_cpu,
        decision.capacity.max_by_memory,
        decision.capacity.max_by_config,
        decision.capacity.final_max,
        limiting
    ));

    if decision.is_breaching() {
        report.push_str(&format!("  {}\n", "SLA BREACH PREDICTED".red().bold()));
    }

    report
}

pub fn format_event(event: &ScalingEvent) -> String {
    match event {
        ScalingEvent::ScalingDecisionMade { decision } => format_decision_report(decision),
        ScalingEvent::WorkersScaled {
            queue_key,
            from,
            to,
            action,
            reason,
        } => format!(
            "{} {} {} -> {} ({}): {}",
            "scaled".bold(),
            queue_key,
            from,
            to,
            action,
            reason
        ),
        ScalingEvent::SlaBreachPredicted {
            queue_key,
            predicted_pickup_sec,
            sla_target_sec,
        } => format!(
            "{} {}: predicted {:.1}s > sla {}s",
            "breach predicted".red().bold(),
            queue_key,
            predicted_pickup_sec,
            sla_target_sec
        ),
        ScalingEvent::SlaRecovered { queue_key } => {
            format!("{} {}", "sla recovered".green().bold(), queue_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CapacityBreakdown, QueueKey};

    fn decision() -> Decision {
        Decision {
            queue_key: QueueKey::new("redis", "default"),
            current_workers: 5,
            target_workers: 8,
            reason: "rate-law dominated".to_string(),
            predicted_pickup_sec: 12.0,
            sla_target_sec: 30,
            capacity: CapacityBreakdown {
                max_by_cpu: 20,
                max_by_memory: 20,
                max_by_config: 20,
                final_max: 8,
                limiting_factor: LimitingFactor::Strategy,
            },
        }
    }

    #[test]
    fn decision_report_includes_queue_and_counts() {
        let report = format_decision_report(&decision());
        assert!(report.contains("redis:default"));
        assert!(report.contains("5"));
        assert!(report.contains("8"));
    }

    #[test]
    fn breaching_decision_flags_the_report() {
        let mut d = decision();
        d.predicted_pickup_sec = 45.0;
        let report = format_decision_report(&d);
        assert!(report.to_lowercase().contains("breach"));
    }

    #[test]
    fn event_formatting_covers_all_kinds() {
        let events = vec![
            ScalingEvent::ScalingDecisionMade { decision: decision() },
            ScalingEvent::WorkersScaled {
                queue_key: QueueKey::new("redis", "default"),
                from: 5,
                to: 8,
                action: Action::ScaleUp,
                reason: "rate-law".to_string(),
            },
            ScalingEvent::SlaBreachPredicted {
                queue_key: QueueKey::new("redis", "default"),
                predicted_pickup_sec: 45.0,
                sla_target_sec: 30,
            },
            ScalingEvent::SlaRecovered {
                queue_key: QueueKey::new("redis", "default"),
            },
        ];
        for event in events {
            assert!(!format_event(&event).is_empty());
        }
    }
}
