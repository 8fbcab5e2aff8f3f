//! KDL configuration parsing for the Copydesk content pipeline.
//!
//! A single `copydesk.kdl` file configures the server, database, scheduler
//! tick, worker timing, per-queue retry policies and collaborator endpoints.
//! Every node is optional and falls back to a default.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, LogFormat, MonitorConfig, RetentionConfig, SchedulerConfig, ServerConfig,
    ServicesConfig, StepTimeouts, SystemConfig, WorkerConfig, load_system_config,
    parse_system_config,
};
