//! Mode controller: drives a session through its rounds.
//!
//! Each round asks the analysis collaborator for the next tool calls,
//! drops URL targets the ledger already covers well, optionally reorders
//! by tool history, fans the rest out through the coordinator, and asks
//! whether the accumulated evidence is sufficient. Deep-mode sessions with
//! an ambiguous question first take a clarification detour.

use crate::clarification::{ClarificationEngine, ClarificationExchange, ClarityVerdict};
use crate::config::{ModeBudget, SleuthConfig};
use crate::coordinator::ToolCoordinator;
use crate::error::{AnalysisError, ClarificationError, OrchestrationError, Result};
use crate::ledger::{SourceLedger, is_url};
use crate::optimizer::{PerformanceTracker, order_queries};
use crate::session::{
    NoOpResearchCallback, ResearchCallback, Round, Session, SessionStatus, SessionSummary,
};
use crate::types::{OutcomeStatus, ResearchMode, ToolCall};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External analysis step (typically an LLM) that plans and judges rounds.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Choose at most `budget` calls for the next round given the history so far.
    async fn select_next_queries(
        &self,
        question: &str,
        rounds: &[Round],
        budget: usize,
    ) -> std::result::Result<Vec<ToolCall>, AnalysisError>;

    /// Decide whether `rounds` answer `question` well enough to stop.
    async fn assess_sufficiency(
        &self,
        question: &str,
        rounds: &[Round],
    ) -> std::result::Result<bool, AnalysisError>;

    /// Text stored as the round's `analysis_summary`.
    fn summarize_round(&self, round: &Round) -> String {
        default_round_summary(round)
    }
}

/// Supplies answers to clarifying questions, usually by asking the user.
#[async_trait]
pub trait ClarificationResponder: Send + Sync {
    /// Answers keyed by clarification, in the order they were given.
    async fn respond(
        &self,
        question: &str,
        clarifications: &[String],
    ) -> std::result::Result<IndexMap<String, String>, ClarificationError>;
}

/// Deterministic one-line tally of a round's outcomes.
pub fn default_round_summary(round: &Round) -> String {
    let count = |status: OutcomeStatus| {
        round
            .tool_results
            .iter()
            .filter(|o| o.status() == status)
            .count()
    };
    format!(
        "round {}: {} calls ({} ok, {} cached, {} duplicate, {} error, {} timeout, {} cancelled), {} filtered, {} sources",
        round.index,
        round.queries.len(),
        count(OutcomeStatus::Ok),
        count(OutcomeStatus::SkippedCached),
        count(OutcomeStatus::SkippedDuplicate),
        count(OutcomeStatus::Error),
        count(OutcomeStatus::Timeout),
        count(OutcomeStatus::Cancelled),
        round.filtered.len(),
        round
            .source_urls()
            .collect::<std::collections::HashSet<_>>()
            .len(),
    )
}

struct Clarifier {
    engine: ClarificationEngine,
    responder: Arc<dyn ClarificationResponder>,
}

/// Drives sessions through select → execute → analyze rounds.
pub struct ModeController {
    analysis: Arc<dyn AnalysisProvider>,
    coordinator: ToolCoordinator,
    ledger: Arc<SourceLedger>,
    config: SleuthConfig,
    clarifier: Option<Clarifier>,
    tracker: Option<Arc<PerformanceTracker>>,
    callback: Arc<dyn ResearchCallback>,
    archive_dir: Option<PathBuf>,
}

impl ModeController {
    pub fn new(
        analysis: Arc<dyn AnalysisProvider>,
        coordinator: ToolCoordinator,
        ledger: Arc<SourceLedger>,
        config: SleuthConfig,
    ) -> Self {
        Self {
            analysis,
            coordinator,
            ledger,
            config,
            clarifier: None,
            tracker: None,
            callback: Arc::new(NoOpResearchCallback),
            archive_dir: None,
        }
    }

    /// Enable the deep-mode clarification detour.
    pub fn with_clarification(
        mut self,
        engine: ClarificationEngine,
        responder: Arc<dyn ClarificationResponder>,
    ) -> Self {
        self.clarifier = Some(Clarifier { engine, responder });
        self
    }

    /// Reorder each round's calls by the tracker's history and feed it outcomes.
    pub fn with_performance_tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Archive every completed summary under `<dir>/research/sessions/`.
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &SleuthConfig {
        &self.config
    }

    pub fn start_session(&self, question: impl Into<String>, mode: ResearchMode) -> Session {
        Session::new(question, mode)
    }

    /// Start and run a session in one call.
    pub async fn research(
        &self,
        question: impl Into<String>,
        mode: ResearchMode,
    ) -> Result<SessionSummary> {
        let mut session = self.start_session(question, mode);
        self.run(&mut session).await
    }

    pub async fn run(&self, session: &mut Session) -> Result<SessionSummary> {
        self.run_with_cancel(session, &CancellationToken::new()).await
    }

    /// Run `session` to completion. Cancelling `cancel` stops new rounds and
    /// undispatched calls; the session still completes, flagged partial.
    ///
    /// Fatal errors mark the session failed and are returned.
    pub async fn run_with_cancel(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<SessionSummary> {
        info!(session = %session.id, mode = %session.mode, "Starting research session");

        if let Err(e) = self.drive(session, cancel).await {
            warn!(session = %session.id, error = %e, "Research session failed");
            session.fail(e.to_string());
            self.callback.on_status_change(&session.id, session.status());
            return Err(e);
        }

        let sources = self.ledger.sources_for(session.source_urls()).await;
        let summary = SessionSummary::from_session(session, sources);
        info!(
            session = %session.id,
            rounds = summary.rounds.len(),
            sources = summary.sources.len(),
            is_partial = summary.is_partial,
            "Research session complete"
        );

        if let Some(dir) = &self.archive_dir {
            if let Err(e) = summary.save(dir) {
                warn!(session = %session.id, error = %e, "Failed to archive session summary");
            }
        }
        Ok(summary)
    }

    async fn drive(&self, session: &mut Session, cancel: &CancellationToken) -> Result<()> {
        let budget = self.budget_for(session.mode)?;
        self.set_status(session, SessionStatus::Running)?;

        if let Some(clarifier) = &self.clarifier {
            if self.config.research.clarification.enabled && session.mode == ResearchMode::Deep {
                let verdict = clarifier.engine.validate(&session.question);
                if !verdict.is_clear {
                    self.clarify(session, clarifier, verdict).await?;
                }
            }
        }

        for index in 0..budget.max_rounds {
            if cancel.is_cancelled() {
                info!(session = %session.id, round = index, "Session cancelled, no further rounds");
                session.cancelled = true;
                break;
            }

            let calls = self
                .analysis
                .select_next_queries(&session.question, session.rounds(), budget.max_tools)
                .await
                .map_err(analysis_failure)?;
            check_calls(&calls, budget.max_tools)?;

            let (mut queries, filtered) = self.filter_covered(calls, &budget).await;
            if let Some(tracker) = &self.tracker {
                queries = order_queries(queries, &tracker.snapshot().await);
            }

            self.callback.on_round_started(index, queries.len());
            let mut round = Round::new(index, queries, filtered);
            round.tool_results = self
                .coordinator
                .execute_round_with_cancel(
                    &round.queries,
                    self.config.coordinator.concurrency_limit,
                    self.config.coordinator.per_call_timeout(),
                    cancel,
                )
                .await;
            if let Some(tracker) = &self.tracker {
                tracker.record_all(&round.tool_results).await;
            }
            session.push_round(round)?;

            let sufficient = self
                .analysis
                .assess_sufficiency(&session.question, session.rounds())
                .await
                .map_err(analysis_failure)?;
            let summary = session
                .rounds()
                .last()
                .map(|r| self.analysis.summarize_round(r))
                .unwrap_or_default();
            session.close_round(summary, sufficient)?;

            if let Some(round) = session.rounds().last() {
                info!(
                    session = %session.id,
                    round = index,
                    calls = round.queries.len(),
                    filtered = round.filtered.len(),
                    sufficient,
                    "Round complete"
                );
                self.callback.on_round_complete(round);
            }

            if cancel.is_cancelled() {
                session.cancelled = true;
            }
            if sufficient || session.cancelled {
                break;
            }
        }

        self.set_status(session, SessionStatus::Complete)
    }

    fn budget_for(&self, mode: ResearchMode) -> Result<ModeBudget> {
        self.config
            .modes
            .validate()
            .map_err(|e| OrchestrationError::InvalidBudget {
                reason: e.to_string(),
            })?;
        Ok(self.config.modes.budget_for(mode))
    }

    fn set_status(&self, session: &mut Session, status: SessionStatus) -> Result<()> {
        session.transition(status)?;
        debug!(session = %session.id, status = %status, "Session status changed");
        self.callback.on_status_change(&session.id, status);
        Ok(())
    }

    /// Validate, ask, refine, re-validate, up to the configured attempts.
    async fn clarify(
        &self,
        session: &mut Session,
        clarifier: &Clarifier,
        mut verdict: ClarityVerdict,
    ) -> Result<()> {
        self.set_status(session, SessionStatus::Clarifying)?;
        let settings = &self.config.research.clarification;
        let mut exchange = ClarificationExchange::new(session.question.clone());

        while !verdict.is_clear && exchange.attempts < settings.max_attempts.max(1) {
            exchange.attempts += 1;
            let current = exchange.effective_question().to_string();
            let questions = clarifier.engine.generate_questions(
                &current,
                &exchange.answered(),
                settings.max_questions,
            );
            self.callback.on_clarification_requested(&questions);
            exchange
                .candidate_clarifications
                .extend(questions.iter().cloned());

            match clarifier.responder.respond(&current, &questions).await {
                Ok(responses) => exchange.responses.extend(responses),
                Err(e) => {
                    warn!(session = %session.id, error = %e, "Clarification responder failed");
                    break;
                }
            }

            let refined = clarifier
                .engine
                .refine(&exchange.question, &exchange.responses);
            if refined != exchange.question {
                exchange.refined_question = Some(refined);
            }
            verdict = clarifier.engine.validate(exchange.effective_question());
        }

        if !verdict.is_clear {
            exchange.degraded = true;
            let err = ClarificationError::Ambiguous {
                attempts: exchange.attempts,
                reasons: verdict.reasons,
            };
            warn!(session = %session.id, error = %err, "Proceeding with ambiguous question");
        }

        session.question = exchange.effective_question().to_string();
        session.clarification = Some(exchange);
        self.set_status(session, SessionStatus::Running)
    }

    /// Split off calls whose URL target is already known with enough quality.
    async fn filter_covered(
        &self,
        calls: Vec<ToolCall>,
        budget: &ModeBudget,
    ) -> (Vec<ToolCall>, Vec<ToolCall>) {
        if budget.allow_reverification {
            return (calls, Vec::new());
        }
        let threshold = self.config.research.quality_threshold;
        let mut kept = Vec::with_capacity(calls.len());
        let mut filtered = Vec::new();
        for call in calls {
            let covered = is_url(&call.query)
                && self
                    .ledger
                    .get(&call.query)
                    .await
                    .is_some_and(|s| s.quality_score >= threshold);
            if covered {
                debug!(tool = %call.tool_name, url = %call.query, "Skipping well-covered source");
                filtered.push(call);
            } else {
                kept.push(call);
            }
        }
        (kept, filtered)
    }
}

fn analysis_failure(err: AnalysisError) -> crate::error::SleuthError {
    match err {
        AnalysisError::Unavailable { message } => {
            OrchestrationError::AnalysisUnavailable { message }.into()
        }
        AnalysisError::InvalidResponse { message } => {
            OrchestrationError::ContractViolation { reason: message }.into()
        }
    }
}

/// Reject plans that exceed the budget or contain blank fields.
fn check_calls(calls: &[ToolCall], max_tools: usize) -> Result<()> {
    if calls.len() > max_tools {
        return Err(OrchestrationError::ContractViolation {
            reason: format!(
                "analysis selected {} calls but the round budget is {max_tools}",
                calls.len()
            ),
        }
        .into());
    }
    if let Some(call) = calls
        .iter()
        .find(|c| c.tool_name.trim().is_empty() || c.query.trim().is_empty())
    {
        return Err(OrchestrationError::ContractViolation {
            reason: format!(
                "analysis selected a call with an empty tool or query: {:?}",
                call
            ),
        }
        .into());
    }
    Ok(())
}
