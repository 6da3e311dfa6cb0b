//! Error types for the engine module.

use thiserror::Error;

use daycycle_delivery::ConfigurationError;

/// Errors surfaced to the caller when the engine is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The declared sources cannot be played.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A tunable is out of range.
    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_message_passes_through() {
        let err = EngineError::from(ConfigurationError::NoPlayableSource);
        assert_eq!(err.to_string(), "No playable source available");
    }
}
