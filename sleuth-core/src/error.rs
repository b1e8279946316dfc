//! Error types for the Sleuth research core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering tool execution, caching, clarification, analysis, orchestration,
//! and configuration domains.

use std::path::PathBuf;

/// Top-level error type for the Sleuth core library.
#[derive(Debug, thiserror::Error)]
pub enum SleuthError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Clarification error: {0}")]
    Clarification(#[from] ClarificationError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from tool registration and execution.
///
/// These never escape the tool coordinator; they are folded into
/// [`ToolOutcome`](crate::types::ToolOutcome) statuses.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Tool '{name}' failed transiently: {message}")]
    Transient { name: String, message: String },

    #[error("Tool '{name}' failed: {message}")]
    Permanent { name: String, message: String },

    #[error("Tool '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Tool already registered: {name}")]
    AlreadyRegistered { name: String },
}

impl ToolError {
    /// Whether the coordinator may retry the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient { .. })
    }
}

/// Errors from the result cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Entry '{key}' ({size_bytes} bytes) exceeds cache capacity of {max_bytes} bytes")]
    CapacityExceeded {
        key: String,
        size_bytes: usize,
        max_bytes: usize,
    },
}

/// Errors from the clarification engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClarificationError {
    #[error("Question still ambiguous after {attempts} attempt(s): {}", .reasons.join("; "))]
    Ambiguous { attempts: u32, reasons: Vec<String> },

    #[error("Clarification responder failed: {message}")]
    ResponderFailed { message: String },
}

/// Errors reported by the analysis collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Analysis returned an invalid response: {message}")]
    InvalidResponse { message: String },
}

/// Errors from the round orchestrator. Any of these fails the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Invalid round budget: {reason}")]
    InvalidBudget { reason: String },

    #[error("Analysis contract violated: {reason}")]
    ContractViolation { reason: String },

    #[error("Analysis step unreachable: {message}")]
    AnalysisUnavailable { message: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `SleuthError`.
pub type Result<T> = std::result::Result<T, SleuthError>;
