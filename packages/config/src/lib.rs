// ABOUTME: Configuration and environment variable management for Skybridge
// ABOUTME: Constants, env parsing helpers and typed startup settings

pub mod constants;
pub mod env;
pub mod settings;

use thiserror::Error;

pub use settings::{OAuthClientSettings, RuntimeSettings};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingVariable(String),

    #[error("Environment variable {name} has invalid value '{value}': {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Could not determine home directory; set SKYBRIDGE_HOME")]
    HomeDirectoryUnavailable,
}
