//! Environment configuration and logging setup for the mailroom agent.

mod config;
mod error;
mod logging;

pub use config::{AgentConfig, SecretKey};
pub use error::{ConfigError, ConfigResult};
pub use logging::init_logging;
