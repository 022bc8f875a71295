//! Error types for the transport engine.

use thiserror::Error;

/// Every failure the engine reports to its caller.
///
/// Terminal photon states are not errors; they live in [`crate::photon::PhotonState`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// Unsupported or inconsistent setup, detected before any photon is launched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A combination the engine knowingly does not support.
    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    /// Word length or period exponent outside the supported generator family.
    #[error("Invalid generator parameters: {0}")]
    InvalidGeneratorParameters(String),

    /// The characteristic-polynomial search ran out of candidates.
    #[error("No maximal-period parameters found for stream id {id} after {attempts} candidates")]
    ParameterSearchExhausted { id: u32, attempts: usize },

    /// A geometry query returned something a photon cannot act on.
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl TransportError {
    pub fn configuration(message: impl Into<String>) -> Self {
        TransportError::Configuration(message.into())
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        TransportError::NotImplemented { feature: feature.into() }
    }

    pub fn invalid_generator(message: impl Into<String>) -> Self {
        TransportError::InvalidGeneratorParameters(message.into())
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        TransportError::DegenerateGeometry(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
