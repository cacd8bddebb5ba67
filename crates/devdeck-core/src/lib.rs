//! Shared contracts for devdeck: service definitions, runtime state types,
//! the browser wire protocol, and TOML configuration loading.

pub mod config;
pub mod protocol;
pub mod types;

pub use config::{DashboardConfig, ServerConfig};
pub use protocol::{ClientCommand, ServerEvent};
pub use types::*;
