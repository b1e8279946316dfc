//! Tool coordinator: bounded, cache-aware fan-out of one round of tool calls.
//!
//! Every requested call yields exactly one [`ToolOutcome`], in request
//! order. Cache hits and already-covered URLs are answered without running
//! the tool; the rest run concurrently behind a semaphore, each attempt
//! under its own timeout, with transient failures retried after backoff.
//! Tool failures are data here, never errors.

use crate::cache::{ResultCache, cache_key};
use crate::config::{CacheConfig, RetryConfig, SleuthConfig};
use crate::error::ToolError;
use crate::ledger::{SourceLedger, SourceMetadata, is_url};
use crate::tools::{ResearchTool, ToolRegistry};
use crate::types::{CachedResult, ToolCall, ToolOutcome, ToolResponse};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct CoordinatorInner {
    registry: Arc<ToolRegistry>,
    cache: Arc<ResultCache>,
    ledger: Arc<SourceLedger>,
    cache_config: CacheConfig,
    retry: RetryConfig,
    freshness_window: Duration,
}

/// Executes rounds of tool calls against shared cache and ledger handles.
#[derive(Clone)]
pub struct ToolCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ToolCoordinator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Arc<ResultCache>,
        ledger: Arc<SourceLedger>,
        config: &SleuthConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry,
                cache,
                ledger,
                cache_config: config.cache.clone(),
                retry: config.retry.clone(),
                freshness_window: config.ledger.freshness_window(),
            }),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    pub fn ledger(&self) -> &Arc<SourceLedger> {
        &self.inner.ledger
    }

    /// Execute `calls` with at most `concurrency_limit` in flight.
    pub async fn execute_round(
        &self,
        calls: &[ToolCall],
        concurrency_limit: usize,
        per_call_timeout: Duration,
    ) -> Vec<ToolOutcome> {
        self.execute_round_with_cancel(
            calls,
            concurrency_limit,
            per_call_timeout,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`execute_round`](Self::execute_round), but calls that have not
    /// started when `cancel` fires are reported as cancelled. Calls already
    /// running finish or time out on their own.
    pub async fn execute_round_with_cancel(
        &self,
        calls: &[ToolCall],
        concurrency_limit: usize,
        per_call_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Vec<ToolOutcome> {
        let mut outcomes: Vec<Option<ToolOutcome>> = vec![None; calls.len()];
        let mut batch_keys = HashSet::new();
        let mut pending = Vec::new();
        let (mut cached, mut duplicates) = (0usize, 0usize);

        for (index, call) in calls.iter().enumerate() {
            let key = cache_key(&call.tool_name, &call.query);

            if let Some(hit) = self.inner.cache.get(&key).await {
                debug!(tool = %call.tool_name, key = %key, "Serving tool call from cache");
                outcomes[index] = Some(ToolOutcome::cached(call, hit));
                cached += 1;
                continue;
            }

            if !batch_keys.insert(key.clone()) {
                outcomes[index] = Some(ToolOutcome::duplicate(call));
                duplicates += 1;
                continue;
            }

            if is_url(&call.query)
                && self
                    .inner
                    .ledger
                    .has_fresh_coverage(&call.query, self.inner.freshness_window)
                    .await
            {
                debug!(tool = %call.tool_name, url = %call.query, "URL already covered, skipping");
                outcomes[index] = Some(ToolOutcome::duplicate(call));
                duplicates += 1;
                continue;
            }

            pending.push((index, call.clone(), key));
        }

        info!(
            requested = calls.len(),
            cached,
            duplicates,
            dispatched = pending.len(),
            concurrency_limit,
            "Executing tool round"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
        let handles = pending.into_iter().map(|(index, call, key)| {
            let inner = self.inner.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let task_call = call.clone();
            let handle = tokio::spawn(async move {
                dispatch(inner, task_call, key, semaphore, cancel, per_call_timeout).await
            });
            async move { (index, call, handle.await) }
        });

        for (index, call, joined) in join_all(handles).await {
            let outcome = joined.unwrap_or_else(|e| {
                warn!(tool = %call.tool_name, error = %e, "Tool task aborted");
                ToolOutcome::error(&call, format!("tool task aborted: {e}"), 0, 1)
            });
            outcomes[index] = Some(outcome);
        }

        outcomes
            .into_iter()
            .zip(calls)
            .map(|(outcome, call)| {
                outcome.unwrap_or_else(|| ToolOutcome::error(call, "no outcome produced", 0, 0))
            })
            .collect()
    }
}

/// Run one call on a worker: wait for a permit, then attempt with retry.
async fn dispatch(
    inner: Arc<CoordinatorInner>,
    call: ToolCall,
    key: String,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    per_call_timeout: Duration,
) -> ToolOutcome {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ToolOutcome::cancelled(&call),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return ToolOutcome::error(&call, "dispatch pool closed", 0, 0),
        },
    };

    let Some(tool) = inner.registry.get(&call.tool_name) else {
        let err = ToolError::NotFound {
            name: call.tool_name.clone(),
        };
        return ToolOutcome::error(&call, err.to_string(), 0, 0);
    };

    let timeout = per_call_timeout.min(tool.timeout());
    let timeout_ms = timeout.as_millis() as u64;
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let result = tokio::time::timeout(timeout, tool.execute(&call.query, timeout)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(response)) => {
                store(&inner, tool.as_ref(), &call, &key, &response).await;
                debug!(tool = %call.tool_name, latency_ms, attempts, "Tool call succeeded");
                return ToolOutcome::ok(&call, response, latency_ms, attempts);
            }
            Ok(Err(e)) if e.is_transient() && attempts <= inner.retry.max_retries => {
                let backoff_ms = compute_backoff(&inner.retry, attempts - 1);
                warn!(
                    tool = %call.tool_name,
                    attempt = attempts,
                    backoff_ms,
                    error = %e,
                    "Retrying after transient tool error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Ok(Err(ToolError::Timeout { timeout_ms, .. })) => {
                warn!(tool = %call.tool_name, timeout_ms, "Tool reported a timeout");
                return ToolOutcome::timeout(&call, timeout_ms, latency_ms, attempts);
            }
            Ok(Err(e)) => {
                warn!(tool = %call.tool_name, attempts, error = %e, "Tool call failed");
                return ToolOutcome::error(&call, e.to_string(), latency_ms, attempts);
            }
            Err(_) => {
                warn!(tool = %call.tool_name, timeout_ms, "Tool call timed out");
                return ToolOutcome::timeout(&call, timeout_ms, latency_ms, attempts);
            }
        }
    }
}

/// Cache the payload and record every surfaced source.
async fn store(
    inner: &CoordinatorInner,
    tool: &dyn ResearchTool,
    call: &ToolCall,
    key: &str,
    response: &ToolResponse,
) {
    let ttl = inner
        .cache_config
        .ttl_override(&call.tool_name)
        .or_else(|| tool.cache_ttl())
        .unwrap_or_else(|| inner.cache_config.default_ttl());
    inner
        .cache
        .put(key, CachedResult::from(response), ttl)
        .await;

    for url in &response.source_urls {
        let metadata = SourceMetadata {
            title: response.source_titles.get(url).cloned(),
        };
        inner.ledger.record(url, &call.tool_name, metadata).await;
    }
}

/// Exponential backoff for retry number `attempt` (0-based), capped.
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% extra.
        let jitter = (capped as f64 * 0.25 * rand::random::<f64>()) as u64;
        capped + jitter
    } else {
        capped
    }
}
