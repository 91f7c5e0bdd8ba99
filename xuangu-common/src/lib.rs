//! xuangu-common - Shared configuration, validation and logging for the
//! xuangu screening services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    AuthConfig, Config, DetailConfig, NetworkConfig, ObservabilityConfig, RedisConfig,
    ServerConfig, ThemesConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
