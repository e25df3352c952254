//! Error types shared between the engine and its storage adapters.

use thiserror::Error;

/// Errors from the state capability.
///
/// Absence is *not* an error: reads return `Ok(None)` for missing keys so
/// the engine can distinguish a missing key from a backend fault.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backing store failed.
    #[error("state backend error: {0}")]
    Backend(String),

    /// A value could not be serialized or deserialized.
    #[error("state serialization error: {0}")]
    Serialization(String),
}
