//! WorkerLauncher (consumed, §6): spawns the configured worker binary as a
//! child process per (connection, queue) and supervises it. The launcher is
//! opaque about what the binary does once running — job execution semantics
//! are its concern, not the controller's.

use async_trait::async_trait;
use domain::{QueueKey, SpawnOptions, StopSignal, WaitOutcome, WorkerHandle, WorkerLauncher};
use shared::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct ProcessWorkerLauncher {
    binary: String,
    extra_args: Vec<String>,
    children: Mutex<HashMap<u32, Child>>,
}

impl ProcessWorkerLauncher {
    pub fn new(binary: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args,
            children: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn spawn(&self, key: &QueueKey, opts: &SpawnOptions) -> Result<WorkerHandle> {
        let mut last_err = None;

        for attempt in 1..=opts.tries.max(1) {
            let mut command = Command::new(&self.binary);
            command
                .arg("--connection")
                .arg(&key.connection)
                .arg("--queue")
                .arg(&key.queue)
                .args(&self.extra_args)
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(false);

            if let Some(cap) = opts.memory_cap_mb {
                command.env("QUEUE_AUTOSCALER_WORKER_MEMORY_CAP_MB", cap.to_string());
            }

            match tokio::time::timeout(opts.timeout, async { command.spawn() }).await {
                Ok(Ok(child)) => {
                    let Some(pid) = child.id() else {
                        last_err = Some(Error::SpawnFailed(
                            "worker exited before its pid could be read".into(),
                        ));
                        continue;
                    };
                    self.children.lock().await.insert(pid, child);
                    info!(queue = %key, pid, attempt, "worker process spawned");
                    return Ok(WorkerHandle(pid));
                }
                Ok(Err(err)) => {
                    last_err = Some(Error::SpawnFailed(err.to_string()));
                }
                Err(_) => {
                    last_err = Some(Error::SpawnFailed("spawn timed out".into()));
                }
            }

            if attempt < opts.tries {
                tokio::time::sleep(opts.sleep).await;
            }
        }

        Err(last_err.unwrap_or_else(|| Error::SpawnFailed("no attempts configured".into())))
    }

    async fn stop(&self, handle: WorkerHandle, signal: StopSignal) -> Result<()> {
        let pid = handle.0;
        match signal {
            StopSignal::Term => {
                send_signal(pid, Signal::Term);
                Ok(())
            }
            StopSignal::Kill => {
                send_signal(pid, Signal::Kill);
                Ok(())
            }
        }
    }

    async fn wait(&self, handle: WorkerHandle, timeout: Duration) -> Result<WaitOutcome> {
        let mut children = self.children.lock().await;
        let Some(child) = children.get_mut(&handle.0) else {
            // Already reaped by an earlier call or never tracked (e.g. a
            // worker adopted by a different controller instance).
            return Ok(WaitOutcome::Exited(0));
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                children.remove(&handle.0);
                Ok(WaitOutcome::Exited(status.code().unwrap_or(-1)))
            }
            Ok(Err(err)) => {
                children.remove(&handle.0);
                Err(Error::Io(err))
            }
            Err(_) => Ok(WaitOutcome::TimedOut),
        }
    }

    async fn kill(&self, handle: WorkerHandle) -> Result<()> {
        send_signal(handle.0, Signal::Kill);
        let mut children = self.children.lock().await;
        if let Some(mut child) = children.remove(&handle.0) {
            let _ = child.kill().await;
        }
        Ok(())
    }

    async fn is_alive(&self, handle: WorkerHandle) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(&handle.0) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

enum Signal {
    Term,
    Kill,
}

/// Direct `libc::kill` rather than a reap-capable wrapper: the controller
/// only needs to deliver the signal, `wait`/`try_wait` above own reaping.
fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    {
        let sig = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        unsafe {
            if libc::kill(pid as i32, sig) != 0 {
                warn!(pid, "libc::kill failed, process may already be gone");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        warn!(pid, "signal delivery is unix-only in this build");
    }
}
