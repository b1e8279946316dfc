//! Core type definitions shared across the research core.
//!
//! Defines research modes, tool calls, and the immutable outcome record the
//! tool coordinator produces for every requested call.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Named budget profile controlling round count and per-round tool count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    Instant,
    Quick,
    #[default]
    Standard,
    Deep,
}

impl ResearchMode {
    /// All modes, shallowest first.
    pub fn all() -> [ResearchMode; 4] {
        [
            ResearchMode::Instant,
            ResearchMode::Quick,
            ResearchMode::Standard,
            ResearchMode::Deep,
        ]
    }
}

impl std::fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResearchMode::Instant => write!(f, "instant"),
            ResearchMode::Quick => write!(f, "quick"),
            ResearchMode::Standard => write!(f, "standard"),
            ResearchMode::Deep => write!(f, "deep"),
        }
    }
}

impl std::str::FromStr for ResearchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(ResearchMode::Instant),
            "quick" => Ok(ResearchMode::Quick),
            "standard" => Ok(ResearchMode::Standard),
            "deep" => Ok(ResearchMode::Deep),
            other => Err(ConfigError::Invalid {
                message: format!("unknown research mode '{other}'"),
            }),
        }
    }
}

/// A single `{tool_name, query}` request selected by the analysis step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub query: String,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            query: query.into(),
        }
    }
}

/// A successful response from a research tool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Opaque tool result.
    pub payload: serde_json::Value,
    /// URLs the tool surfaced while answering.
    #[serde(default)]
    pub source_urls: BTreeSet<String>,
    /// Optional titles for entries of `source_urls`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_titles: BTreeMap<String, String>,
}

impl ToolResponse {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, url: impl Into<String>) -> Self {
        self.source_urls.insert(url.into());
        self
    }

    pub fn with_titled_source(mut self, url: impl Into<String>, title: impl Into<String>) -> Self {
        let url = url.into();
        self.source_titles.insert(url.clone(), title.into());
        self.source_urls.insert(url);
        self
    }
}

/// Result status of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Error,
    Timeout,
    SkippedCached,
    SkippedDuplicate,
    /// Suppressed because the session was cancelled before dispatch.
    Cancelled,
}

impl OutcomeStatus {
    /// Whether this status carries a payload.
    pub fn has_payload(&self) -> bool {
        matches!(self, OutcomeStatus::Ok | OutcomeStatus::SkippedCached)
    }

    /// Whether the tool actually ran and failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeStatus::Error | OutcomeStatus::Timeout)
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeStatus::Ok => "ok",
            OutcomeStatus::Error => "error",
            OutcomeStatus::Timeout => "timeout",
            OutcomeStatus::SkippedCached => "skipped_cached",
            OutcomeStatus::SkippedDuplicate => "skipped_duplicate",
            OutcomeStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Immutable record of one tool call, produced by the tool coordinator.
///
/// `payload` is present iff the status is `Ok` or `SkippedCached`; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    tool_name: String,
    query: String,
    status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    source_urls: BTreeSet<String>,
    latency_ms: u64,
    #[serde(default)]
    attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ToolOutcome {
    fn base(call: &ToolCall, status: OutcomeStatus) -> Self {
        Self {
            tool_name: call.tool_name.clone(),
            query: call.query.clone(),
            status,
            payload: None,
            source_urls: BTreeSet::new(),
            latency_ms: 0,
            attempts: 0,
            error: None,
        }
    }

    pub fn ok(call: &ToolCall, response: ToolResponse, latency_ms: u64, attempts: u32) -> Self {
        Self {
            payload: Some(response.payload),
            source_urls: response.source_urls,
            latency_ms,
            attempts,
            ..Self::base(call, OutcomeStatus::Ok)
        }
    }

    pub fn cached(call: &ToolCall, cached: CachedResult) -> Self {
        Self {
            payload: Some(cached.payload),
            source_urls: cached.source_urls,
            ..Self::base(call, OutcomeStatus::SkippedCached)
        }
    }

    pub fn duplicate(call: &ToolCall) -> Self {
        Self::base(call, OutcomeStatus::SkippedDuplicate)
    }

    pub fn error(
        call: &ToolCall,
        message: impl Into<String>,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            error: Some(message.into()),
            latency_ms,
            attempts,
            ..Self::base(call, OutcomeStatus::Error)
        }
    }

    pub fn timeout(call: &ToolCall, timeout_ms: u64, latency_ms: u64, attempts: u32) -> Self {
        Self {
            error: Some(format!("timed out after {timeout_ms}ms")),
            latency_ms,
            attempts,
            ..Self::base(call, OutcomeStatus::Timeout)
        }
    }

    pub fn cancelled(call: &ToolCall) -> Self {
        Self {
            error: Some("session cancelled before dispatch".into()),
            ..Self::base(call, OutcomeStatus::Cancelled)
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    pub fn source_urls(&self) -> &BTreeSet<String> {
        &self.source_urls
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Value stored in the result cache for one `(tool, query)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source_urls: BTreeSet<String>,
}

impl From<&ToolResponse> for CachedResult {
    fn from(response: &ToolResponse) -> Self {
        Self {
            payload: response.payload.clone(),
            source_urls: response.source_urls.clone(),
        }
    }
}
