//! Error types for the simulated target

use thiserror::Error;

/// Errors raised while configuring a simulated target
#[derive(Debug, Error)]
pub enum SimError {
    /// Option key is not recognised
    #[error("Unknown sim option: {0}")]
    UnknownOption(String),

    /// Option value could not be parsed
    #[error("Invalid value for sim option {key}: {value}")]
    InvalidValue {
        /// Option key
        key: String,
        /// Offending value
        value: String,
    },

    /// Configured memory regions are inconsistent
    #[error("Invalid sim layout: {0}")]
    InvalidLayout(&'static str),

    /// Preload image does not fit the simulated flash
    #[error("Image of {image} bytes does not fit {flash} bytes of flash")]
    ImageTooLarge {
        /// Image size
        image: usize,
        /// Flash size
        flash: usize,
    },
}

/// Result type for simulator configuration
pub type Result<T> = std::result::Result<T, SimError>;
