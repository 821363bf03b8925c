//! Error types for provider loading and capability calls.
//!
//! Load-time errors never leave the plugin host: they are logged and replaced
//! by the fallback provider. Only [`CapabilityError`] reaches callers.

use thiserror::Error;

use crate::plugins::traits::Capability;

/// Provider source text could not be compiled or threw during its
/// synchronous top-level execution.
#[derive(Debug, Clone, Error)]
#[error("failed to construct execution scope for {path}: {message}")]
pub struct ScopeConstructionError {
    /// Diagnostic path of the provider
    pub path: String,
    /// Engine error text (message and stack when available)
    pub message: String,
}

impl ScopeConstructionError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// The value a provider exported does not have a usable shape.
#[derive(Debug, Clone, Error)]
#[error("export of {path} is unusable: {reason}")]
pub struct NormalizationFailure {
    pub path: String,
    pub reason: String,
}

impl NormalizationFailure {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single capability call, surfaced to whoever invoked it.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The provider rejected (or threw from) the operation.
    #[error("{capability} rejected: {message}")]
    Rejected {
        capability: Capability,
        message: String,
    },
    /// The provider resolved a value that does not fit the payload type.
    #[error("{capability} returned a malformed payload: {source}")]
    MalformedPayload {
        capability: Capability,
        #[source]
        source: serde_json::Error,
    },
}

impl CapabilityError {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Rejected { capability, .. } | Self::MalformedPayload { capability, .. } => {
                *capability
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_error_mentions_path() {
        let err = ScopeConstructionError::new("./qq.js", "SyntaxError: unexpected token");
        let text = err.to_string();
        assert!(text.contains("./qq.js"));
        assert!(text.contains("SyntaxError"));
    }

    #[test]
    fn capability_error_reports_capability() {
        let err = CapabilityError::Rejected {
            capability: Capability::Lyric,
            message: "Error: boom".into(),
        };
        assert_eq!(err.capability(), Capability::Lyric);
        assert!(err.to_string().starts_with("getLyric rejected"));
    }
}
