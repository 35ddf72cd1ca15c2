use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity for all per-queue state: the pair (connection, queue). Discovered
/// from metrics each tick; there is no separate registry to keep in sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    pub connection: String,
    pub queue: String,
}

impl QueueKey {
    pub fn new(connection: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            queue: queue.into(),
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection, self.queue)
    }
}

/// Immutable per-queue configuration. Once loaded for a cycle the record is
/// never mutated; a fresh one is read at the start of the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_pickup_time_sec: u32,
    pub min_workers: u32,
    pub max_workers: u32,
    pub scale_cooldown_sec: u32,
    pub breach_threshold: f64,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_pickup_time_sec == 0 {
            return Err("max_pickup_time_sec must be > 0".into());
        }
        if self.min_workers > self.max_workers {
            return Err(format!(
                "min_workers ({}) must be <= max_workers ({})",
                self.min_workers, self.max_workers
            ));
        }
        if !(0.0..=1.0).contains(&self.breach_threshold) {
            return Err(format!(
                "breach_threshold ({}) must be within [0, 1]",
                self.breach_threshold
            ));
        }
        Ok(())
    }
}

/// Per-tick snapshot supplied by the caller. Any numeric field may be zero;
/// calculators must never divide by one without checking first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub pending: u64,
    pub oldest_job_age_sec: u64,
    pub throughput_per_minute: f64,
    pub avg_job_duration_ms: f64,
    pub active_workers: u32,
    pub measured_at: DateTime<Utc>,
}

/// Output of the arrival-rate estimator (C8's collaborator, C1's calculator).
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalEstimate {
    pub rate: f64,
    pub confidence: f64,
    pub source: &'static str,
}

/// Output of the capacity calculator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityBreakdown {
    pub max_by_cpu: i64,
    pub max_by_memory: i64,
    pub max_by_config: i64,
    pub final_max: i64,
    pub limiting_factor: LimitingFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitingFactor {
    Cpu,
    Memory,
    Config,
    Strategy,
    Unavailable,
}

impl fmt::Display for LimitingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LimitingFactor::Cpu => "cpu",
            LimitingFactor::Memory => "memory",
            LimitingFactor::Config => "config",
            LimitingFactor::Strategy => "strategy",
            LimitingFactor::Unavailable => "unavailable",
        };
        write!(f, "{s}")
    }
}

/// Strategy output before the engine applies capacity and config bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub workers: u32,
    pub reason: String,
    pub predicted_pickup_sec: f64,
    pub arrival_rate_source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ScaleUp,
    ScaleDown,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::ScaleUp => "scale_up",
            Action::ScaleDown => "scale_down",
            Action::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

/// Result of C3 for one queue and tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub queue_key: QueueKey,
    pub current_workers: u32,
    pub target_workers: u32,
    pub reason: String,
    pub predicted_pickup_sec: f64,
    pub sla_target_sec: u32,
    pub capacity: CapacityBreakdown,
}

impl Decision {
    pub fn action(&self) -> Action {
        if self.target_workers > self.current_workers {
            Action::ScaleUp
        } else if self.target_workers < self.current_workers {
            Action::ScaleDown
        } else {
            Action::Hold
        }
    }

    pub fn workers_to_add(&self) -> u32 {
        self.target_workers.saturating_sub(self.current_workers)
    }

    pub fn workers_to_remove(&self) -> u32 {
        self.current_workers.saturating_sub(self.target_workers)
    }

    pub fn is_breaching(&self) -> bool {
        self.predicted_pickup_sec > self.sla_target_sec as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Exited,
}

/// One Worker record per OS process the controller spawned. Destroyed after
/// reap; the pool never re-adopts a record once it has transitioned here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub pid: u32,
    pub queue_key: QueueKey,
    pub started_at: DateTime<Utc>,
    pub state: WorkerState,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
}

/// Typed notifications published to the EventSink. Delivery is at-least-once;
/// duplicates must be harmless to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ScalingEvent {
    ScalingDecisionMade { decision: Decision },
    WorkersScaled {
        queue_key: QueueKey,
        from: u32,
        to: u32,
        action: Action,
        reason: String,
    },
    SlaBreachPredicted {
        queue_key: QueueKey,
        predicted_pickup_sec: f64,
        sla_target_sec: u32,
    },
    SlaRecovered { queue_key: QueueKey },
}
