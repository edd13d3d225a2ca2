pub mod child;
pub mod client;
pub mod config;
pub mod constants;
pub mod gateway;
pub mod hooks;
pub mod job;
pub mod process;
pub mod queue;
pub mod registry;
pub mod settings;
pub mod stats;
pub mod status;
pub mod task;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use client::ResqueClient;
pub use config::{ConfigSource, load_settings};
pub use gateway::RedisGateway;
pub use hooks::Hooks;
pub use job::{FailedRecord, FailureCause, JobPayload, JobRecord};
pub use registry::WorkerId;
pub use settings::ResqueSettings;
pub use status::{JobStatus, StatusRecord};
pub use task::{Task, TaskFn, TaskRegistry};
pub use worker::{Control, Worker};
