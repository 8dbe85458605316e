//! Error types for Modelboard Core.

use modelboard_training::TrainingError;
use thiserror::Error;

/// Core error type for server setup and storage operations.
#[derive(Error, Debug)]
pub enum ModelboardError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file parse errors
    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Address parsing errors
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset, model or artifact errors
    #[error("Training error: {0}")]
    Training(#[from] TrainingError),
}

/// Result type alias for Modelboard operations.
pub type Result<T> = std::result::Result<T, ModelboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_address_parsing() {
        let parse_err = "not-an-address".parse::<std::net::SocketAddr>().unwrap_err();
        let err: ModelboardError = parse_err.into();
        assert!(matches!(err, ModelboardError::InvalidAddress(_)));
    }

    #[test]
    fn test_error_training_conversion() {
        let err: ModelboardError = TrainingError::EmptyDataset.into();
        match err {
            ModelboardError::Training(TrainingError::EmptyDataset) => {}
            other => panic!("Expected Training error variant, got {other:?}"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ModelboardError::Config("bad split".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad split");
    }
}
