//! The action response envelope and reserved synthetic statuses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status recorded when an action timed out and `continuationOnTimeout`
/// was set.
pub const STATUS_TIMEOUT_ON_ACTION: &str = "TimeoutOnAction";

/// Status recorded when retries were exhausted under the `None` policy and
/// `continuationOnRetryExhaustion` was set.
pub const STATUS_RETRY_EXHAUSTED_ON_ACTION: &str = "RetryExhaustedOnAction";

/// The outcome envelope an action returns.
///
/// Carries a mandatory `status` string plus an open set of additional
/// fields. A committed response is the durable record that its action ran
/// to a terminal outcome exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Terminal outcome of the action.
    pub status: String,
    /// Any additional fields the action chose to return.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ActionResponse {
    /// Response with the given status and no extra fields.
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            data: Map::new(),
        }
    }

    /// Attach an extra field to the envelope.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Synthetic response recorded in place of an action timeout.
    pub fn timeout_on_action() -> Self {
        Self::new(STATUS_TIMEOUT_ON_ACTION)
    }

    /// Synthetic response recorded in place of retry exhaustion.
    pub fn retry_exhausted_on_action() -> Self {
        Self::new(STATUS_RETRY_EXHAUSTED_ON_ACTION)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
