//! Research session state machine, round records, and archived summaries.

use crate::clarification::ClarificationExchange;
use crate::error::{OrchestrationError, Result};
use crate::ledger::Source;
use crate::persistence::{atomic_write_json, json_files, load_json};
use crate::types::{ResearchMode, ToolCall, ToolOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Lifecycle status of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    /// One-time detour to sharpen an ambiguous question (deep mode only).
    Clarifying,
    Complete,
    Failed,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Running, Clarifying)
                | (Clarifying, Running)
                | (Running, Complete)
                | (Created | Running | Clarifying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Clarifying => "clarifying",
            SessionStatus::Complete => "complete",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One select → execute → analyze iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub index: usize,
    /// Calls submitted to the coordinator, in submission order.
    pub queries: Vec<ToolCall>,
    /// One outcome per entry of `queries`, same order.
    pub tool_results: Vec<ToolOutcome>,
    /// Calls dropped because their URL target was already well covered.
    #[serde(default)]
    pub filtered: Vec<ToolCall>,
    pub analysis_summary: String,
    pub is_sufficient: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn new(index: usize, queries: Vec<ToolCall>, filtered: Vec<ToolCall>) -> Self {
        Self {
            index,
            queries,
            tool_results: Vec::new(),
            filtered,
            analysis_summary: String::new(),
            is_sufficient: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// First outcome whose query equals `query`.
    pub fn result_for(&self, query: &str) -> Option<&ToolOutcome> {
        self.tool_results.iter().find(|o| o.query() == query)
    }

    pub fn is_closed(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Every source URL reported by this round's outcomes, in order.
    pub fn source_urls(&self) -> impl Iterator<Item = &str> {
        self.tool_results
            .iter()
            .flat_map(|o| o.source_urls().iter().map(String::as_str))
    }

    pub fn has_payload(&self) -> bool {
        self.tool_results.iter().any(|o| o.status().has_payload())
    }
}

/// A research session. Rounds are append-only and close once assessed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Current question; replaced by the refined question after clarification.
    pub question: String,
    pub original_question: String,
    pub mode: ResearchMode,
    rounds: Vec<Round>,
    status: SessionStatus,
    pub clarification: Option<ClarificationExchange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

impl Session {
    pub fn new(question: impl Into<String>, mode: ResearchMode) -> Self {
        let question = question.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            original_question: question.clone(),
            question,
            mode,
            rounds: Vec::new(),
            status: SessionStatus::Created,
            clarification: None,
            created_at: now,
            updated_at: now,
            error: None,
            cancelled: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// Move to `next`, rejecting transitions outside the lifecycle graph.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestrationError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the session as failed. Terminal sessions are left untouched.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            warn!(session = %self.id, status = %self.status, "Ignoring failure on finished session");
            return;
        }
        self.error = Some(error.into());
        self.status = SessionStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Append a round. Its index must equal the current round count and the
    /// previous round must be closed.
    pub fn push_round(&mut self, round: Round) -> Result<()> {
        if round.index != self.rounds.len() {
            return Err(OrchestrationError::ContractViolation {
                reason: format!(
                    "round index {} does not follow {} recorded rounds",
                    round.index,
                    self.rounds.len()
                ),
            }
            .into());
        }
        if self.rounds.last().is_some_and(|r| !r.is_closed()) {
            return Err(OrchestrationError::ContractViolation {
                reason: "previous round is still open".into(),
            }
            .into());
        }
        self.rounds.push(round);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Close the latest open round with its assessment.
    pub fn close_round(&mut self, analysis_summary: String, is_sufficient: bool) -> Result<()> {
        let Some(round) = self.rounds.last_mut().filter(|r| !r.is_closed()) else {
            return Err(OrchestrationError::ContractViolation {
                reason: "no open round to close".into(),
            }
            .into());
        };
        round.analysis_summary = analysis_summary;
        round.is_sufficient = is_sufficient;
        round.finished_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_sufficient(&self) -> bool {
        self.rounds.last().is_some_and(|r| r.is_sufficient)
    }

    /// Whether the outcome would be reported as partial.
    pub fn is_partial(&self) -> bool {
        !self.is_sufficient() || self.cancelled || !self.rounds.iter().any(Round::has_payload)
    }

    /// Every source URL referenced by any round, in first-seen order.
    pub fn source_urls(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.rounds
            .iter()
            .flat_map(Round::source_urls)
            .filter(|url| seen.insert(*url))
            .collect()
    }
}

/// Read-only projection of a finished session returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub question: String,
    pub original_question: String,
    pub mode: ResearchMode,
    pub status: SessionStatus,
    pub rounds: Vec<Round>,
    pub sources: Vec<Source>,
    pub is_partial: bool,
    pub clarification: Option<ClarificationExchange>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Project `session`; `sources` are the ledger entries it referenced.
    pub fn from_session(session: &Session, sources: Vec<Source>) -> Self {
        Self {
            id: session.id,
            question: session.question.clone(),
            original_question: session.original_question.clone(),
            mode: session.mode,
            status: session.status,
            rounds: session.rounds.clone(),
            sources,
            is_partial: session.is_partial(),
            clarification: session.clarification.clone(),
            created_at: session.created_at,
            completed_at: session.updated_at,
        }
    }

    fn sessions_dir(base_dir: &Path) -> PathBuf {
        base_dir.join("research").join("sessions")
    }

    /// Archive to `<base_dir>/research/sessions/<id>.json`.
    pub fn save(&self, base_dir: &Path) -> Result<PathBuf> {
        let path = Self::sessions_dir(base_dir).join(format!("{}.json", self.id));
        atomic_write_json(&path, self)?;
        Ok(path)
    }

    /// Load an archived summary; `Ok(None)` if it was never saved.
    pub fn load(base_dir: &Path, id: &Uuid) -> Result<Option<Self>> {
        let path = Self::sessions_dir(base_dir).join(format!("{id}.json"));
        Ok(load_json(&path)?)
    }

    /// Every readable archived summary, newest first. Unreadable files are skipped.
    pub fn list(base_dir: &Path) -> Vec<Self> {
        let mut summaries: Vec<Self> = json_files(&Self::sessions_dir(base_dir))
            .into_iter()
            .filter_map(|path| match load_json::<Self>(&path) {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session archive");
                    None
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        summaries
    }
}

/// Progress hooks for hosts that surface research as it happens.
pub trait ResearchCallback: Send + Sync {
    fn on_status_change(&self, session: &Uuid, status: SessionStatus);
    fn on_clarification_requested(&self, questions: &[String]);
    fn on_round_started(&self, index: usize, planned_calls: usize);
    fn on_round_complete(&self, round: &Round);
}

/// No-op callback.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_status_change(&self, _session: &Uuid, _status: SessionStatus) {}
    fn on_clarification_requested(&self, _questions: &[String]) {}
    fn on_round_started(&self, _index: usize, _planned_calls: usize) {}
    fn on_round_complete(&self, _round: &Round) {}
}
