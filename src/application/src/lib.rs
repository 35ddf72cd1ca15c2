pub mod arrival_rate;
pub mod calculators;
pub mod engine;
pub mod manager;
pub mod policy;
pub mod strategy;
pub mod worker_pool;

pub use engine::{Engine, ResourceSnapshot};
pub use manager::{ConfigProvider, LimitsSettings, Manager, ManagerConfig, ManagerState};
pub use policy::{BreachNotification, ConservativeScaleDown, NoScaleDown, Policy, PolicyChain};
pub use strategy::{HybridPredictiveStrategy, ScalingSettings, Strategy, TrendPolicy};
pub use worker_pool::{ReconcileOutcome, WorkerPool};
