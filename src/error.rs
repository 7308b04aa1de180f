//! Error taxonomy for the Cobble build pipeline.
//!
//! Protocol-lifecycle violations carry stable error codes so the JS CLI can
//! match on them; everything else flows through `BuildError`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_HANDLE_INERT: &str = "CB-ERR-HANDLE-INERT";
pub const ERR_DOUBLE_ESTABLISH: &str = "CB-ERR-DOUBLE-ESTABLISH";
pub const ERR_FACTORY_AFTER_ESTABLISH: &str = "CB-ERR-FACTORY-AFTER-ESTABLISH";
pub const ERR_NO_ADDON: &str = "CB-ERR-NO-ADDON";

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_HANDLE_INERT => {
            "Registration handles are valid only for the duration of their factory call."
        }
        ERR_DOUBLE_ESTABLISH => "Exactly one component is established as the addon root.",
        ERR_FACTORY_AFTER_ESTABLISH => {
            "No component is produced after the addon root has been established."
        }
        ERR_NO_ADDON => "Every build evaluates to exactly one established addon root.",
        _ => "Unknown protocol rule.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// A violation of the component composition protocol. Always fatal; never
/// retried or suppressed. Once-key misses are NOT protocol errors; they are
/// reported as a "not created" result to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
    pub guarantee: String,
}

impl ProtocolError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        ProtocolError {
            code: code.to_string(),
            message: message.into(),
            guarantee: get_guarantee(code).to_string(),
        }
    }

    /// A handle function was invoked after its factory returned. The message
    /// must name the function so the violation is attributable.
    pub fn handle_inert(function: &str) -> Self {
        Self::new(
            ERR_HANDLE_INERT,
            format!("{}() called on an inert registration handle after its factory returned", function),
        )
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Fatal outcome of one build invocation. All variants propagate synchronously
/// out of `pipeline::build`; the orchestrator reports them and aborts the
/// attempt. Partial files already on disk are not rolled back.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("evaluation failed: {0}")]
    Eval(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("[CB-ERR-NO-ADDON] entry module completed without establishing an addon root")]
    NoAddon,

    #[error("invalid manifest {path}: {message}")]
    Manifest { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_carries_code_and_guarantee() {
        let err = ProtocolError::new(ERR_DOUBLE_ESTABLISH, "establishAddon called twice");
        assert_eq!(err.code, ERR_DOUBLE_ESTABLISH);
        assert!(err.guarantee.contains("Exactly one"));
        assert!(err.to_string().starts_with("[CB-ERR-DOUBLE-ESTABLISH]"));
    }

    #[test]
    fn test_handle_inert_names_the_function() {
        let err = ProtocolError::handle_inert("entity");
        assert!(err.message.contains("entity()"));
        assert_eq!(err.code, ERR_HANDLE_INERT);
    }
}
