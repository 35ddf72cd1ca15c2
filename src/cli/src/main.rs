//! Minimal CLI surface (§6): the single command that matters is
//! `queue:autoscale`, which starts the daemon and runs until it drains.

use clap::{Parser, Subcommand};
use domain::{EventSink, ScalingEvent};
use infrastructure::{AppConfig, FileMetricsSource, ProcessWorkerLauncher, SysinfoResourceSource, SystemClock, TracingEventSink};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Mirrors every event to stdout via `presentation`'s plain-text report,
/// in addition to the structured log line `TracingEventSink` already emits.
/// Used for interactive runs where a human is watching the terminal.
struct ForegroundEventSink {
    inner: TracingEventSink,
}

impl EventSink for ForegroundEventSink {
    fn publish(&self, event: ScalingEvent) {
        println!("{}", presentation::format_event(&event));
        self.inner.publish(event);
    }
}

#[derive(Parser)]
#[command(name = "queue-autoscale")]
#[command(about = "Autoscaling controller for queue-worker processes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the autoscaling daemon.
    #[command(name = "queue:autoscale")]
    Autoscale {
        /// Evaluation interval in seconds, overriding the config file.
        #[arg(long)]
        evaluation_interval: Option<u64>,

        /// Path to the queue metrics snapshot consumed each tick.
        #[arg(long, default_value = "queue-metrics.json")]
        metrics_file: String,

        /// Worker binary to spawn per queue.
        #[arg(long, default_value = "queue-worker")]
        worker_binary: String,

        /// Also print a plain-text report for every event to stdout.
        #[arg(long)]
        foreground: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Command::Autoscale {
            evaluation_interval,
            metrics_file,
            worker_binary,
            foreground,
        } => run_autoscale(evaluation_interval, metrics_file, worker_binary, foreground).await,
    };

    std::process::exit(exit_code);
}

async fn run_autoscale(
    evaluation_interval: Option<u64>,
    metrics_file: String,
    worker_binary: String,
    foreground: bool,
) -> i32 {
    let mut config = match AppConfig::load() {
        Ok(c) => c,
        Err(err) => {
            error!(error = %err, "invalid configuration, refusing to start");
            return 1;
        }
    };

    if let Some(secs) = evaluation_interval {
        config.manager.evaluation_interval_seconds = secs;
    }

    if !config.enabled {
        info!("autoscaler disabled by configuration, exiting cleanly");
        return 0;
    }

    let strategy = Arc::new(application::HybridPredictiveStrategy::new(application::ScalingSettings {
        fallback_job_time_seconds: config.scaling.fallback_job_time_seconds,
        min_arrival_rate_confidence: config.scaling.min_arrival_rate_confidence,
        trend_policy: config
            .scaling
            .trend_policy
            .parse()
            .unwrap_or(application::TrendPolicy::Hint),
    }));

    let sink: Arc<dyn domain::EventSink> = if foreground {
        Arc::new(ForegroundEventSink {
            inner: TracingEventSink,
        })
    } else {
        Arc::new(TracingEventSink)
    };

    let policies = build_policy_chain(&config.policies, sink.clone());
    let engine = application::Engine::new(strategy.clone(), policies);

    let launcher = Arc::new(ProcessWorkerLauncher::new(worker_binary, Vec::new()));
    let pool = Arc::new(application::WorkerPool::new(
        launcher,
        domain::SpawnOptions {
            tries: config.workers.tries,
            timeout: Duration::from_secs(config.workers.timeout_seconds),
            sleep: Duration::from_secs(config.workers.sleep_seconds),
            memory_cap_mb: None,
        },
        Duration::from_secs(config.workers.shutdown_timeout_seconds),
    ));

    let manager = application::Manager::new(
        Arc::new(FileMetricsSource::new(metrics_file)),
        Arc::new(SysinfoResourceSource::new()),
        pool,
        engine,
        strategy,
        sink,
        Arc::new(SystemClock),
        Arc::new(config.clone()),
        application::ManagerConfig {
            evaluation_interval: Duration::from_secs(config.manager.evaluation_interval_seconds),
            health_check_interval: Duration::from_secs(config.workers.health_check_interval_seconds),
            drain_deadline: Duration::from_secs(config.workers.shutdown_timeout_seconds * 2),
        },
        application::LimitsSettings {
            reserve_cpu_cores: config.limits.reserve_cpu_cores,
            max_cpu_percent: config.limits.max_cpu_percent,
            max_memory_percent: config.limits.max_memory_percent,
            worker_memory_mb_estimate: config.limits.worker_memory_mb_estimate,
        },
    );

    info!("manager starting");
    match manager.run().await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "manager exited with an error");
            1
        }
    }
}

fn build_policy_chain(
    identifiers: &[String],
    sink: Arc<dyn domain::EventSink>,
) -> application::PolicyChain {
    let mut policies: Vec<Arc<dyn application::Policy>> = Vec::new();
    for id in identifiers {
        match id.as_str() {
            "conservative-scale-down" => policies.push(Arc::new(application::ConservativeScaleDown)),
            "no-scale-down" => policies.push(Arc::new(application::NoScaleDown)),
            "breach-notification" => {
                policies.push(Arc::new(application::BreachNotification::new(sink.clone())))
            }
            other => error!(policy = other, "unknown policy identifier, skipping"),
        }
    }
    application::PolicyChain::new(policies)
}
