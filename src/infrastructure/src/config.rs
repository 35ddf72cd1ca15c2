//! Configuration surface (§6): loaded once at startup into an immutable
//! record, then handed out by reference. Re-loading between ticks (never
//! mid-tick) is a matter of swapping the `Arc<AppConfig>` the caller holds;
//! this type itself is just the parsed record plus the lookup the manager
//! needs.

use application::ConfigProvider;
use domain::QueueConfig;
use serde::Deserialize;
use shared::{Error, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlaDefaults {
    pub max_pickup_time_sec: u32,
    pub min_workers: u32,
    pub max_workers: u32,
    pub scale_cooldown_sec: u32,
    pub breach_threshold: f64,
}

impl Default for SlaDefaults {
    fn default() -> Self {
        Self {
            max_pickup_time_sec: 30,
            min_workers: 1,
            max_workers: 20,
            scale_cooldown_sec: 10,
            breach_threshold: 0.5,
        }
    }
}

impl From<SlaDefaults> for QueueConfig {
    fn from(d: SlaDefaults) -> Self {
        QueueConfig {
            max_pickup_time_sec: d.max_pickup_time_sec,
            min_workers: d.min_workers,
            max_workers: d.max_workers,
            scale_cooldown_sec: d.scale_cooldown_sec,
            breach_threshold: d.breach_threshold,
        }
    }
}

/// Any subset of `QueueConfig`'s fields, layered over `sla_defaults`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueOverride {
    pub max_pickup_time_sec: Option<u32>,
    pub min_workers: Option<u32>,
    pub max_workers: Option<u32>,
    pub scale_cooldown_sec: Option<u32>,
    pub breach_threshold: Option<f64>,
}

impl QueueOverride {
    fn apply(&self, base: QueueConfig) -> QueueConfig {
        QueueConfig {
            max_pickup_time_sec: self.max_pickup_time_sec.unwrap_or(base.max_pickup_time_sec),
            min_workers: self.min_workers.unwrap_or(base.min_workers),
            max_workers: self.max_workers.unwrap_or(base.max_workers),
            scale_cooldown_sec: self.scale_cooldown_sec.unwrap_or(base.scale_cooldown_sec),
            breach_threshold: self.breach_threshold.unwrap_or(base.breach_threshold),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScalingToml {
    pub fallback_job_time_seconds: f64,
    pub min_arrival_rate_confidence: f64,
    pub trend_policy: String,
    pub breach_threshold: f64,
}

impl Default for ScalingToml {
    fn default() -> Self {
        Self {
            fallback_job_time_seconds: 2.0,
            min_arrival_rate_confidence: 0.5,
            trend_policy: "hint".to_string(),
            breach_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub worker_memory_mb_estimate: u64,
    pub reserve_cpu_cores: u32,
}

impl Default for LimitsToml {
    fn default() -> Self {
        Self {
            max_cpu_percent: 85.0,
            max_memory_percent: 85.0,
            worker_memory_mb_estimate: 256,
            reserve_cpu_cores: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersToml {
    pub timeout_seconds: u64,
    pub tries: u32,
    pub sleep_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub health_check_interval_seconds: u64,
}

impl Default for WorkersToml {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            tries: 3,
            sleep_seconds: 1,
            shutdown_timeout_seconds: 30,
            health_check_interval_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerToml {
    pub evaluation_interval_seconds: u64,
}

impl Default for ManagerToml {
    fn default() -> Self {
        Self {
            evaluation_interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub enabled: bool,
    pub sla_defaults: SlaDefaults,
    pub queues: HashMap<String, QueueOverride>,
    pub scaling: ScalingToml,
    pub limits: LimitsToml,
    pub workers: WorkersToml,
    pub manager: ManagerToml,
    pub strategy: String,
    pub policies: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sla_defaults: SlaDefaults::default(),
            queues: HashMap::new(),
            scaling: ScalingToml::default(),
            limits: LimitsToml::default(),
            workers: WorkersToml::default(),
            manager: ManagerToml::default(),
            strategy: "hybrid_predictive".to_string(),
            policies: vec!["conservative-scale-down".to_string(), "breach-notification".to_string()],
        }
    }
}

impl AppConfig {
    /// Searches, in order, the path named by `QUEUE_AUTOSCALER_CONFIG`, then
    /// `./queue-autoscaler.toml`, then falls back to defaults overridden by
    /// environment variables. `.env` is loaded first if present.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        for path in Self::candidate_paths() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::load_from_env())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(explicit) = env::var("QUEUE_AUTOSCALER_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("queue-autoscaler.toml"));
        paths
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Only `QUEUE_AUTOSCALER_ENABLED` is honoured here; a deployment that
    /// needs finer-grained env overrides should ship a config file instead.
    fn load_from_env() -> Self {
        let mut config = Self::default();
        if let Ok(enabled) = env::var("QUEUE_AUTOSCALER_ENABLED") {
            config.enabled = enabled.parse().unwrap_or(true);
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        let base: QueueConfig = self.sla_defaults.clone().into();
        base.validate().map_err(Error::config_invalid)?;

        for (name, over) in &self.queues {
            let merged = over.apply(base);
            merged
                .validate()
                .map_err(|e| Error::config_invalid(format!("queue '{name}': {e}")))?;
        }

        if !(0.0..=1.0).contains(&self.scaling.breach_threshold) {
            return Err(Error::config_invalid("scaling.breach_threshold must be within [0, 1]"));
        }
        application::TrendPolicy::from_str(&self.scaling.trend_policy)
            .map_err(Error::config_invalid)?;

        Ok(())
    }

    fn base_queue_config(&self) -> QueueConfig {
        self.sla_defaults.clone().into()
    }
}

impl ConfigProvider for AppConfig {
    fn queue_config(&self, key: &domain::QueueKey) -> QueueConfig {
        let base = self.base_queue_config();
        match self.queues.get(&key.to_string()) {
            Some(over) => over.apply(base),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn queue_override_layers_over_sla_defaults() {
        let mut config = AppConfig::default();
        config.queues.insert(
            "redis:critical".to_string(),
            QueueOverride {
                max_workers: Some(50),
                ..Default::default()
            },
        );
        let key = domain::QueueKey::new("redis", "critical");
        let resolved = config.queue_config(&key);
        assert_eq!(resolved.max_workers, 50);
        assert_eq!(resolved.min_workers, config.sla_defaults.min_workers);
    }

    #[test]
    fn invalid_sla_defaults_reject_at_load() {
        let mut config = AppConfig::default();
        config.sla_defaults.min_workers = 10;
        config.sla_defaults.max_workers = 1;
        assert!(config.validate().is_err());
    }
}
