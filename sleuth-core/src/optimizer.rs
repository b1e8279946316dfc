//! Query ordering by historical tool performance.

use crate::types::{OutcomeStatus, ToolCall, ToolOutcome};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Aggregated history for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPerformance {
    pub samples: u64,
    pub successes: u64,
    /// Mean latency over every sample, successful or not.
    pub avg_latency_ms: f64,
}

impl ToolPerformance {
    pub fn success_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.successes as f64 / self.samples as f64
        }
    }

    fn observe(&mut self, success: bool, latency_ms: u64) {
        self.samples += 1;
        if success {
            self.successes += 1;
        }
        self.avg_latency_ms += (latency_ms as f64 - self.avg_latency_ms) / self.samples as f64;
    }
}

/// Stable reorder of `queries`: tools with history first, by descending
/// success rate then ascending average latency. Ties and tools without
/// history keep their original relative order.
pub fn order_queries(
    mut queries: Vec<ToolCall>,
    history: &HashMap<String, ToolPerformance>,
) -> Vec<ToolCall> {
    let lookup = |call: &ToolCall| history.get(&call.tool_name).filter(|p| p.samples > 0);
    queries.sort_by(|a, b| match (lookup(a), lookup(b)) {
        (Some(pa), Some(pb)) => pb
            .success_rate()
            .total_cmp(&pa.success_rate())
            .then_with(|| pa.avg_latency_ms.total_cmp(&pb.avg_latency_ms)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    queries
}

/// In-memory per-tool success and latency tracker.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    tools: Mutex<HashMap<String, ToolPerformance>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an executed outcome. Skipped and cancelled calls never ran and
    /// are ignored.
    pub async fn record(&self, outcome: &ToolOutcome) {
        let success = match outcome.status() {
            OutcomeStatus::Ok => true,
            OutcomeStatus::Error | OutcomeStatus::Timeout => false,
            OutcomeStatus::SkippedCached
            | OutcomeStatus::SkippedDuplicate
            | OutcomeStatus::Cancelled => return,
        };
        self.tools
            .lock()
            .await
            .entry(outcome.tool_name().to_string())
            .or_default()
            .observe(success, outcome.latency_ms());
    }

    pub async fn record_all(&self, outcomes: &[ToolOutcome]) {
        for outcome in outcomes {
            self.record(outcome).await;
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, ToolPerformance> {
        self.tools.lock().await.clone()
    }
}
