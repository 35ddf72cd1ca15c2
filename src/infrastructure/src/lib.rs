pub mod clock;
pub mod config;
pub mod event_sink;
pub mod metrics_source;
pub mod process_launcher;
pub mod resource_source;

pub use clock::SystemClock;
pub use config::AppConfig;
pub use event_sink::TracingEventSink;
pub use metrics_source::FileMetricsSource;
pub use process_launcher::ProcessWorkerLauncher;
pub use resource_source::SysinfoResourceSource;
