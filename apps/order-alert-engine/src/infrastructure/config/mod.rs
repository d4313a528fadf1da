//! Configuration
//!
//! Engine configuration loaded from environment variables.

mod settings;

pub use settings::{
    AuthToken, ConfigError, EngineConfig, EscalationSettings, PollingSettings, ServerSettings,
    SocketSettings,
};
