//! Scriptable collaborators for tests and local experiments.
//!
//! [`MockTool`] answers from a queue of scripted results and then falls
//! back to echoing the query; [`ScriptedAnalysis`] replays a fixed plan;
//! [`ScriptedResponder`] answers every clarification the same way.

use crate::error::{AnalysisError, ClarificationError, ToolError};
use crate::orchestrator::{AnalysisProvider, ClarificationResponder};
use crate::session::Round;
use crate::tools::ResearchTool;
use crate::types::{ToolCall, ToolResponse};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks how many tool executions overlap.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest overlap observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ProbeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }
}

struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A tool with scripted results.
///
/// Queued results are consumed in order; once the queue is empty the tool
/// either repeats its permanent failure or returns `{"tool", "query"}` with
/// the configured sources.
pub struct MockTool {
    name: String,
    delay: Duration,
    timeout: Duration,
    cache_ttl: Option<Duration>,
    sources: Vec<(String, Option<String>)>,
    script: Mutex<VecDeque<Result<ToolResponse, ToolError>>>,
    always_fail: Option<ToolError>,
    probe: Option<Arc<ConcurrencyProbe>>,
    calls: AtomicUsize,
}

impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
            cache_ttl: None,
            sources: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            always_fail: None,
            probe: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Report `url` with every default response.
    pub fn with_source(mut self, url: impl Into<String>) -> Self {
        self.sources.push((url.into(), None));
        self
    }

    pub fn with_titled_source(mut self, url: impl Into<String>, title: impl Into<String>) -> Self {
        self.sources.push((url.into(), Some(title.into())));
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn queue_response(self, response: ToolResponse) -> Self {
        lock(&self.script).push_back(Ok(response));
        self
    }

    pub fn queue_error(self, error: ToolError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Fail every call once the queue is drained.
    pub fn always_fail(mut self, error: ToolError) -> Self {
        self.always_fail = Some(error);
        self
    }

    /// Number of times `execute` was invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn default_response(&self, query: &str) -> ToolResponse {
        let response = ToolResponse::new(serde_json::json!({
            "tool": self.name,
            "query": query,
        }));
        self.sources
            .iter()
            .fold(response, |response, (url, title)| match title {
                Some(title) => response.with_titled_source(url.clone(), title.clone()),
                None => response.with_source(url.clone()),
            })
    }
}

#[async_trait]
impl ResearchTool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, query: &str, _timeout: Duration) -> Result<ToolResponse, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.probe.as_deref().map(ConcurrencyProbe::enter);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(result) => result,
            None => match &self.always_fail {
                Some(error) => Err(error.clone()),
                None => Ok(self.default_response(query)),
            },
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }
}

/// Analysis collaborator that replays a fixed plan.
///
/// Round `n` uses the `n`-th scripted selection, repeating the last one
/// when the script runs out (an empty plan selects nothing).
#[derive(Default)]
pub struct ScriptedAnalysis {
    selections: Vec<Vec<ToolCall>>,
    sufficient_after: Option<usize>,
    select_error: Option<AnalysisError>,
    assess_error: Option<AnalysisError>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_select(mut self, calls: Vec<ToolCall>) -> Self {
        self.selections.push(calls);
        self
    }

    /// Report sufficiency once at least `rounds` rounds exist.
    pub fn sufficient_after(mut self, rounds: usize) -> Self {
        self.sufficient_after = Some(rounds);
        self
    }

    /// Fail every selection.
    pub fn fail_with(mut self, error: AnalysisError) -> Self {
        self.select_error = Some(error);
        self
    }

    /// Fail every sufficiency assessment.
    pub fn fail_assessment_with(mut self, error: AnalysisError) -> Self {
        self.assess_error = Some(error);
        self
    }

    /// Questions passed to `select_next_queries`, in call order.
    pub fn questions_seen(&self) -> Vec<String> {
        lock(&self.questions).clone()
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedAnalysis {
    async fn select_next_queries(
        &self,
        question: &str,
        rounds: &[Round],
        _budget: usize,
    ) -> Result<Vec<ToolCall>, AnalysisError> {
        lock(&self.questions).push(question.to_string());
        if let Some(error) = &self.select_error {
            return Err(error.clone());
        }
        let plan = self
            .selections
            .get(rounds.len())
            .or_else(|| self.selections.last())
            .cloned()
            .unwrap_or_default();
        Ok(plan)
    }

    async fn assess_sufficiency(
        &self,
        _question: &str,
        rounds: &[Round],
    ) -> Result<bool, AnalysisError> {
        if let Some(error) = &self.assess_error {
            return Err(error.clone());
        }
        Ok(self.sufficient_after.is_some_and(|n| rounds.len() >= n))
    }
}

/// Responder that answers every clarification with the same text.
pub struct ScriptedResponder {
    answer: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedResponder {
    pub fn answering(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A responder that is never reachable.
    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClarificationResponder for ScriptedResponder {
    async fn respond(
        &self,
        _question: &str,
        clarifications: &[String],
    ) -> Result<IndexMap<String, String>, ClarificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answer
            .as_ref()
            .ok_or_else(|| ClarificationError::ResponderFailed {
                message: "no one is answering".into(),
            })?;
        Ok(clarifications
            .iter()
            .map(|c| (c.clone(), answer.clone()))
            .collect())
    }
}
