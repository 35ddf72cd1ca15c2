//! Worker pool (C5): tracks every process this controller has spawned, keyed
//! by queue, and reconciles that set toward a target count per tick.
//!
//! The pool map is the single mutable shared resource in the whole
//! controller. It is guarded by one lock, held only for the mutation itself —
//! never across an await on the launcher (a stuck spawn/stop call must not
//! stall every other queue's reconcile).

use domain::{
    QueueKey, SpawnOptions, StopSignal, WaitOutcome, WorkerHandle, WorkerLauncher, WorkerRecord,
    WorkerState,
};
use shared::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct LiveWorker {
    handle: WorkerHandle,
    record: WorkerRecord,
}

/// Outcome of one `reconcile` call, surfaced to the manager loop so it knows
/// whether to publish `WorkersScaled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOutcome {
    pub spawned: u32,
    pub spawn_failures: u32,
    pub stopped: u32,
}

pub struct WorkerPool {
    launcher: Arc<dyn WorkerLauncher>,
    workers: Mutex<HashMap<QueueKey, Vec<LiveWorker>>>,
    spawn_options: SpawnOptions,
    shutdown_timeout: Duration,
    accepting_spawns: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        spawn_options: SpawnOptions,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            workers: Mutex::new(HashMap::new()),
            spawn_options,
            shutdown_timeout,
            accepting_spawns: AtomicBool::new(true),
        }
    }

    /// The pool's own live count for a key — never the metrics source's
    /// `activeWorkers`, which may include processes this controller did not
    /// spawn.
    pub async fn current_count(&self, key: &QueueKey) -> u32 {
        self.workers
            .lock()
            .await
            .get(key)
            .map(|ws| ws.len() as u32)
            .unwrap_or(0)
    }

    /// Drives the live set for `key` toward `target`. Spawning beyond current
    /// and stopping down to target are mutually exclusive per call, matching
    /// the spec's `if target > current / elif target < current` branching.
    pub async fn reconcile(&self, key: &QueueKey, target: u32, reason: &str) -> ReconcileOutcome {
        let current = self.current_count(key).await;

        if target > current {
            self.grow(key, target - current, reason).await
        } else if target < current {
            self.shrink(key, current - target, reason).await
        } else {
            ReconcileOutcome::default()
        }
    }

    async fn grow(&self, key: &QueueKey, count: u32, reason: &str) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        if !self.accepting_spawns.load(Ordering::SeqCst) {
            warn!(queue = %key, "spawn requested after shutdown began, ignoring");
            return outcome;
        }

        for _ in 0..count {
            match self.spawn_one(key).await {
                Ok(live) => {
                    self.workers
                        .lock()
                        .await
                        .entry(key.clone())
                        .or_default()
                        .push(live);
                    outcome.spawned += 1;
                }
                Err(err) => {
                    warn!(queue = %key, error = %err, reason, "spawn failed, will retry next tick");
                    outcome.spawn_failures += 1;
                }
            }
        }
        outcome
    }

    async fn spawn_one(&self, key: &QueueKey) -> Result<LiveWorker> {
        let handle = self
            .launcher
            .spawn(key, &self.spawn_options)
            .await
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;
        let record = WorkerRecord {
            pid: handle.0,
            queue_key: key.clone(),
            started_at: chrono::Utc::now(),
            state: WorkerState::Running,
            last_health_check_at: None,
            last_exit_code: None,
        };
        info!(queue = %key, pid = handle.0, "worker started");
        Ok(LiveWorker { handle, record })
    }

    /// Stops the `count` workers with the longest uptime first: the pool's
    /// running set continually refreshes and older, possibly-leaky processes
    /// rotate out before newer ones.
    async fn shrink(&self, key: &QueueKey, count: u32, reason: &str) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let victims = {
            let mut guard = self.workers.lock().await;
            let Some(live) = guard.get_mut(key) else {
                return outcome;
            };
            live.sort_by_key(|w| w.record.started_at);
            let n = (count as usize).min(live.len());
            live.drain(0..n).collect::<Vec<_>>()
        };

        for victim in victims {
            self.terminate(&victim.handle).await;
            outcome.stopped += 1;
            info!(queue = %key, pid = victim.handle.0, reason, "worker stopped");
        }
        outcome
    }

    /// Polite stop, wait up to the shutdown timeout, then force-kill. Never
    /// holds the pool lock across these awaits.
    async fn terminate(&self, handle: &WorkerHandle) {
        if let Err(err) = self.launcher.stop(*handle, StopSignal::Term).await {
            warn!(pid = handle.0, error = %err, "graceful stop signal failed, will force-kill");
        }

        match self.launcher.wait(*handle, self.shutdown_timeout).await {
            Ok(WaitOutcome::Exited(_)) => {}
            Ok(WaitOutcome::TimedOut) | Err(_) => {
                warn!(pid = handle.0, "worker did not exit within shutdown timeout, force-killing");
                if let Err(err) = self.launcher.kill(*handle).await {
                    warn!(pid = handle.0, error = %err, "force-kill failed");
                }
            }
        }
    }

    /// Polls every tracked worker's liveness; a dead one is reaped so the
    /// next reconcile replaces it if the target is unchanged.
    pub async fn health_check(&self) {
        let mut guard = self.workers.lock().await;
        for (key, live) in guard.iter_mut() {
            let mut i = 0;
            while i < live.len() {
                let handle = live[i].handle;
                if self.launcher.is_alive(handle).await {
                    live[i].record.last_health_check_at = Some(chrono::Utc::now());
                    i += 1;
                } else {
                    warn!(queue = %key, pid = handle.0, "worker found dead on health check, reaping");
                    live.remove(i);
                }
            }
        }
    }

    /// Reconciles every tracked key to zero and refuses further spawns.
    /// Individual terminations still respect the shutdown timeout; this does
    /// not impose an additional overall deadline of its own — the caller
    /// (the manager's drain loop) is responsible for an overall bound.
    pub async fn shutdown(&self) {
        self.accepting_spawns.store(false, Ordering::SeqCst);
        let keys: Vec<QueueKey> = self.workers.lock().await.keys().cloned().collect();
        for key in keys {
            self.reconcile(&key, 0, "shutdown").await;
        }
    }

    pub async fn total_live(&self) -> u32 {
        self.workers.lock().await.values().map(|v| v.len() as u32).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FakeLauncher {
        next_pid: AtomicU32,
        fail_spawns: AtomicBool,
    }

    impl FakeLauncher {
        fn new() -> Self {
            Self {
                next_pid: AtomicU32::new(1),
                fail_spawns: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl WorkerLauncher for FakeLauncher {
        async fn spawn(&self, _key: &QueueKey, _opts: &SpawnOptions) -> Result<WorkerHandle> {
            if self.fail_spawns.load(Ordering::SeqCst) {
                return Err(Error::SpawnFailed("fake failure".into()));
            }
            Ok(WorkerHandle(self.next_pid.fetch_add(1, Ordering::SeqCst)))
        }

        async fn stop(&self, _handle: WorkerHandle, _signal: StopSignal) -> Result<()> {
            Ok(())
        }

        async fn wait(&self, _handle: WorkerHandle, _timeout: Duration) -> Result<WaitOutcome> {
            Ok(WaitOutcome::Exited(0))
        }

        async fn kill(&self, _handle: WorkerHandle) -> Result<()> {
            Ok(())
        }

        async fn is_alive(&self, _handle: WorkerHandle) -> bool {
            true
        }
    }

    fn pool(launcher: Arc<FakeLauncher>) -> WorkerPool {
        WorkerPool::new(
            launcher,
            SpawnOptions {
                tries: 3,
                timeout: Duration::from_secs(5),
                sleep: Duration::from_millis(100),
                memory_cap_mb: None,
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn reconcile_spawns_up_to_target() {
        let p = pool(Arc::new(FakeLauncher::new()));
        let key = QueueKey::new("redis", "default");
        let outcome = p.reconcile(&key, 5, "scale up").await;
        assert_eq!(outcome.spawned, 5);
        assert_eq!(p.current_count(&key).await, 5);
    }

    #[tokio::test]
    async fn reconcile_stops_down_to_target() {
        let p = pool(Arc::new(FakeLauncher::new()));
        let key = QueueKey::new("redis", "default");
        p.reconcile(&key, 5, "scale up").await;
        let outcome = p.reconcile(&key, 2, "scale down").await;
        assert_eq!(outcome.stopped, 3);
        assert_eq!(p.current_count(&key).await, 2);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_at_target() {
        let p = pool(Arc::new(FakeLauncher::new()));
        let key = QueueKey::new("redis", "default");
        p.reconcile(&key, 4, "up").await;
        for _ in 0..3 {
            let outcome = p.reconcile(&key, 4, "noop").await;
            assert_eq!(outcome.spawned, 0);
            assert_eq!(outcome.stopped, 0);
        }
        assert_eq!(p.current_count(&key).await, 4);
    }

    #[tokio::test]
    async fn spawn_failure_is_recorded_not_counted_live() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.fail_spawns.store(true, Ordering::SeqCst);
        let p = pool(launcher);
        let key = QueueKey::new("redis", "default");
        let outcome = p.reconcile(&key, 3, "up").await;
        assert_eq!(outcome.spawned, 0);
        assert_eq!(outcome.spawn_failures, 3);
        assert_eq!(p.current_count(&key).await, 0);
    }

    #[tokio::test]
    async fn shrink_prefers_oldest_uptime_first() {
        let p = pool(Arc::new(FakeLauncher::new()));
        let key = QueueKey::new("redis", "default");
        p.reconcile(&key, 1, "up").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        p.reconcile(&key, 3, "up").await;

        let oldest_pid = {
            let guard = p.workers.lock().await;
            guard.get(&key).unwrap()[0].handle.0
        };

        p.reconcile(&key, 2, "down").await;

        let remaining: Vec<u32> = {
            let guard = p.workers.lock().await;
            guard.get(&key).unwrap().iter().map(|w| w.handle.0).collect()
        };
        assert!(!remaining.contains(&oldest_pid));
    }

    #[tokio::test]
    async fn shutdown_drains_every_key_and_refuses_new_spawns() {
        let p = pool(Arc::new(FakeLauncher::new()));
        let a = QueueKey::new("redis", "a");
        let b = QueueKey::new("redis", "b");
        p.reconcile(&a, 2, "up").await;
        p.reconcile(&b, 3, "up").await;

        p.shutdown().await;

        assert_eq!(p.total_live().await, 0);
        let outcome = p.reconcile(&a, 5, "should be refused").await;
        assert_eq!(outcome.spawned, 0);
    }

    #[tokio::test]
    async fn health_check_reaps_dead_workers() {
        struct DyingLauncher {
            next_pid: AtomicU32,
        }
        #[async_trait]
        impl WorkerLauncher for DyingLauncher {
            async fn spawn(&self, _key: &QueueKey, _opts: &SpawnOptions) -> Result<WorkerHandle> {
                Ok(WorkerHandle(self.next_pid.fetch_add(1, Ordering::SeqCst)))
            }
            async fn stop(&self, _handle: WorkerHandle, _signal: StopSignal) -> Result<()> {
                Ok(())
            }
            async fn wait(&self, _handle: WorkerHandle, _timeout: Duration) -> Result<WaitOutcome> {
                Ok(WaitOutcome::Exited(1))
            }
            async fn kill(&self, _handle: WorkerHandle) -> Result<()> {
                Ok(())
            }
            async fn is_alive(&self, _handle: WorkerHandle) -> bool {
                false
            }
        }

        let p = pool_with(Arc::new(DyingLauncher {
            next_pid: AtomicU32::new(1),
        }));
        let key = QueueKey::new("redis", "default");
        p.reconcile(&key, 2, "up").await;
        p.health_check().await;
        assert_eq!(p.current_count(&key).await, 0);
    }

    fn pool_with<L: WorkerLauncher + 'static>(launcher: Arc<L>) -> WorkerPool {
        WorkerPool::new(
            launcher,
            SpawnOptions {
                tries: 3,
                timeout: Duration::from_secs(5),
                sleep: Duration::from_millis(100),
                memory_cap_mb: None,
            },
            Duration::from_secs(1),
        )
    }
}
