use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the host through a completion callback.
///
/// The bridge relays it to the caller as-is; no wrapping or translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HostError {}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("method name must be a non-empty string")]
    InvalidMethodName,
    #[error("module name must be a non-empty string")]
    InvalidModuleName,
    #[error("module `{0}` is reserved for the method channel")]
    ReservedModule(String),
    #[error("host dropped the completion for {module}.{method} without settling it")]
    CompletionDropped { module: String, method: String },
}

impl BridgeError {
    /// The host-reported failure, if this error relays one.
    pub fn host_error(&self) -> Option<&HostError> {
        match self {
            BridgeError::Host(err) => Some(err),
            _ => None,
        }
    }
}
