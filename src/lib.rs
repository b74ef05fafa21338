pub mod cli;
pub mod client;
pub mod collect;
pub mod config;
pub mod error;
pub mod model;
pub mod render;
pub mod server;

pub use client::{GitLabApi, GitLabClient};
pub use collect::collect_report;
pub use config::{RunRequest, ServiceConfig};
pub use error::{ApiError, ConfigError, Result, RunError};
pub use model::Report;
