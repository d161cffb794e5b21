//! Error types for configuration loading and validation.

/// Errors that can occur when loading or validating a `progcache.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// An environment override held a value that could not be interpreted.
    #[error("invalid value '{value}' for environment variable {name}")]
    InvalidEnv {
        /// The environment variable name.
        name: String,
        /// The rejected value.
        value: String,
    },
}
