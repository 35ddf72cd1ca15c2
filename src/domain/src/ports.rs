use crate::model::{QueueKey, QueueMetrics, ScalingEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::Result;
use std::time::Duration;

/// Supplies queue depth, processing rate, worker count, oldest-job age,
/// average job duration and trend hints. Implemented by a concrete adapter;
/// the controller only ever sees this trait.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn list_queues(&self) -> Result<Vec<(QueueKey, QueueMetrics)>>;
}

/// Host resources observed from outside the controller.
pub struct ResourceLimits {
    pub cpu_cores: u32,
    pub memory_bytes: u64,
}

#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn limits(&self) -> Result<ResourceLimits>;
    async fn cpu_usage_percent(&self, sample: Duration) -> Result<f64>;
    async fn memory_used_percent(&self) -> Result<f64>;
}

/// Opaque reference to a spawned worker process. The launcher is free to keep
/// richer bookkeeping (stdout/stderr pipes, a wait channel) behind this; the
/// pid is the only detail worth exposing across the port boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Term,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i32),
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct SpawnOptions {
    pub tries: u32,
    pub timeout: Duration,
    pub sleep: Duration,
    pub memory_cap_mb: Option<u64>,
}

/// Spawns, signals and reaps the worker binary. The launcher is opaque
/// regarding what binary it runs; job execution semantics are its concern,
/// not the controller's.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn spawn(&self, key: &QueueKey, opts: &SpawnOptions) -> Result<WorkerHandle>;
    async fn stop(&self, handle: WorkerHandle, signal: StopSignal) -> Result<()>;
    async fn wait(&self, handle: WorkerHandle, timeout: Duration) -> Result<WaitOutcome>;
    async fn kill(&self, handle: WorkerHandle) -> Result<()>;
    async fn is_alive(&self, handle: WorkerHandle) -> bool;
}

/// Publishes the four event kinds. Calls must never suspend the control
/// loop; a default implementation writes structured log lines and tolerates
/// a dropped event over a stalled tick.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ScalingEvent);
}

/// Time source, injected so tests can run a whole tick sequence without real
/// wall-clock delay.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
