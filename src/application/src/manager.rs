//! Manager loop (C6): the single logical flow driving the whole controller.
//! init -> running -> draining -> stopped, ticking on a timer and reconciling
//! one queue at a time within each tick.

use crate::engine::{Engine, ResourceSnapshot};
use crate::strategy::Strategy;
use crate::worker_pool::WorkerPool;
use chrono::{DateTime, Utc};
use domain::{Action, Clock, EventSink, MetricsSource, QueueKey, ResourceSource, ScalingEvent};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Init,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub evaluation_interval: Duration,
    pub health_check_interval: Duration,
    pub drain_deadline: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(15),
            drain_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimitsSettings {
    pub reserve_cpu_cores: u32,
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub worker_memory_mb_estimate: u64,
}

/// Supplies the (possibly overridden) QueueConfig for a key. Manager-local
/// wiring, not a spec-named external collaborator, so it lives here rather
/// than in `domain::ports`.
pub trait ConfigProvider: Send + Sync {
    fn queue_config(&self, key: &QueueKey) -> domain::QueueConfig;
}

pub struct Manager {
    metrics: Arc<dyn MetricsSource>,
    resources: Arc<dyn ResourceSource>,
    pool: Arc<WorkerPool>,
    engine: Engine,
    strategy: Arc<dyn Strategy>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config_provider: Arc<dyn ConfigProvider>,
    manager_config: ManagerConfig,
    limits: LimitsSettings,
    state: Mutex<ManagerState>,
    last_scale_action_at: Mutex<HashMap<QueueKey, DateTime<Utc>>>,
    prior_breach: Mutex<HashMap<QueueKey, bool>>,
    consecutive_metrics_failures: AtomicU32,
    shutdown_requested: Arc<AtomicBool>,
}

impl Manager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        resources: Arc<dyn ResourceSource>,
        pool: Arc<WorkerPool>,
        engine: Engine,
        strategy: Arc<dyn Strategy>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config_provider: Arc<dyn ConfigProvider>,
        manager_config: ManagerConfig,
        limits: LimitsSettings,
    ) -> Self {
        Self {
            metrics,
            resources,
            pool,
            engine,
            strategy,
            sink,
            clock,
            config_provider,
            manager_config,
            limits,
            state: Mutex::new(ManagerState::Init),
            last_scale_action_at: Mutex::new(HashMap::new()),
            prior_breach: Mutex::new(HashMap::new()),
            consecutive_metrics_failures: AtomicU32::new(0),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.lock().await
    }

    /// A clone of the shutdown flag a signal handler can set from outside.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown_requested.clone()
    }

    /// Runs until a shutdown is requested, then drains and returns. The
    /// caller maps the return value to the process exit code (0 on clean
    /// drain, per the CLI surface).
    pub async fn run(&self) -> Result<(), shared::Error> {
        install_signal_handlers(self.shutdown_requested.clone());

        *self.state.lock().await = ManagerState::Running;
        info!("manager entering running state");

        let mut eval_ticker = tokio::time::interval(self.manager_config.evaluation_interval);
        let mut health_ticker = tokio::time::interval(self.manager_config.health_check_interval);

        loop {
            if self.shutdown_requested.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = eval_ticker.tick() => {
                    self.run_tick().await;
                }
                _ = health_ticker.tick() => {
                    self.pool.health_check().await;
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        *self.state.lock().await = ManagerState::Draining;
        info!("manager draining: stopping all workers");

        let outcome = tokio::time::timeout(self.manager_config.drain_deadline, self.pool.shutdown()).await;
        if outcome.is_err() {
            warn!("drain deadline exceeded, remaining workers force-killed by the pool's own shutdown timeout");
        }

        *self.state.lock().await = ManagerState::Stopped;
        info!("manager stopped");
    }

    /// One full evaluation cycle across every queue MetricsSource reports.
    /// Public so tests (and a future non-timer-driven caller) can drive ticks
    /// directly without waiting on the interval.
    pub async fn run_tick(&self) {
        let queues = match self.metrics.list_queues().await {
            Ok(q) => {
                self.consecutive_metrics_failures.store(0, Ordering::SeqCst);
                q
            }
            Err(err) => {
                let failures = self.consecutive_metrics_failures.fetch_add(1, Ordering::SeqCst) + 1;
                error!(error = %err, consecutive_failures = failures, "metrics fetch failed, skipping tick");
                if failures >= 3 {
                    warn!(consecutive_failures = failures, "metrics source degraded");
                }
                return;
            }
        };

        let present: HashSet<QueueKey> = queues.iter().map(|(k, _)| k.clone()).collect();
        self.strategy.prune_missing(&present);

        let resources = self.fetch_resources().await;
        let now = self.clock.now();

        for (key, metrics) in queues {
            self.evaluate_queue(&key, &metrics, resources.as_ref(), now).await;
        }
    }

    async fn fetch_resources(&self) -> Option<ResourceSnapshot> {
        let limits = match self.resources.limits().await {
            Ok(l) => l,
            Err(err) => {
                warn!(error = %err, "resource source unavailable, falling back to conservative capacity");
                return None;
            }
        };
        let cpu = match self.resources.cpu_usage_percent(Duration::from_millis(200)).await {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "cpu usage read failed, falling back to conservative capacity");
                return None;
            }
        };
        let mem = match self.resources.memory_used_percent().await {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "memory usage read failed, falling back to conservative capacity");
                return None;
            }
        };

        Some(ResourceSnapshot {
            total_cores: limits.cpu_cores,
            reserve_cores: self.limits.reserve_cpu_cores,
            max_cpu_percent: self.limits.max_cpu_percent,
            current_cpu_percent: cpu,
            total_memory_mb: limits.memory_bytes / (1024 * 1024),
            max_mem_percent: self.limits.max_memory_percent,
            current_mem_percent: mem,
            worker_mem_estimate_mb: self.limits.worker_memory_mb_estimate,
        })
    }

    async fn evaluate_queue(
        &self,
        key: &QueueKey,
        metrics: &domain::QueueMetrics,
        resources: Option<&ResourceSnapshot>,
        now: DateTime<Utc>,
    ) {
        let config = self.config_provider.queue_config(key);
        let current_workers = self.pool.current_count(key).await;

        let cooling_down = match self.last_scale_action_at.lock().await.get(key) {
            Some(last) => (now - *last).num_seconds() < config.scale_cooldown_sec as i64,
            None => false,
        };

        if cooling_down {
            self.sink.publish(ScalingEvent::ScalingDecisionMade {
                decision: domain::Decision {
                    queue_key: key.clone(),
                    current_workers,
                    target_workers: current_workers,
                    reason: "hold (cooldown)".to_string(),
                    predicted_pickup_sec: 0.0,
                    sla_target_sec: config.max_pickup_time_sec,
                    capacity: domain::CapacityBreakdown {
                        max_by_cpu: current_workers as i64,
                        max_by_memory: current_workers as i64,
                        max_by_config: current_workers as i64,
                        final_max: current_workers as i64,
                        limiting_factor: domain::LimitingFactor::Strategy,
                    },
                },
            });
            return;
        }

        let decision = self
            .engine
            .evaluate(key, metrics, &config, current_workers, resources, now);

        self.sink.publish(ScalingEvent::ScalingDecisionMade {
            decision: decision.clone(),
        });

        if decision.action() != Action::Hold {
            let outcome = self
                .pool
                .reconcile(key, decision.target_workers, &decision.reason)
                .await;
            let new_count = self.pool.current_count(key).await;
            if new_count != current_workers {
                self.sink.publish(ScalingEvent::WorkersScaled {
                    queue_key: key.clone(),
                    from: current_workers,
                    to: new_count,
                    action: decision.action(),
                    reason: decision.reason.clone(),
                });
                self.last_scale_action_at
                    .lock()
                    .await
                    .insert(key.clone(), now);
            }
            if outcome.spawn_failures > 0 {
                warn!(queue = %key, failures = outcome.spawn_failures, "some spawns failed this tick");
            }
        }

        let breaching = decision.is_breaching();
        let mut prior = self.prior_breach.lock().await;
        let was_breaching = prior.insert(key.clone(), breaching).unwrap_or(false);
        drop(prior);

        if breaching && !was_breaching {
            self.sink.publish(ScalingEvent::SlaBreachPredicted {
                queue_key: key.clone(),
                predicted_pickup_sec: decision.predicted_pickup_sec,
                sla_target_sec: decision.sla_target_sec,
            });
        } else if !breaching && was_breaching {
            self.sink.publish(ScalingEvent::SlaRecovered {
                queue_key: key.clone(),
            });
        }
    }
}

fn install_signal_handlers(shutdown: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, draining");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, draining");
                }
            }
            shutdown.store(true, Ordering::SeqCst);
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c, draining");
            shutdown.store(true, Ordering::SeqCst);
        });
    }
}
