pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod logging;
pub mod prompt;

pub use bootstrap::Runtime;
pub use config::{Config, ConfigError};
