//! Clarification engine for ambiguous research questions.
//!
//! Heuristic and deterministic: a question is checked against a fixed set
//! of rules, each failing rule yields a clarifying question, and the
//! answers are folded back into a single refined question. The engine keeps
//! no state between calls; the exchange record lives on the session.

use crate::cache::normalize_query;
use crate::config::ClarificationConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const VAGUE_REFERENTS: &[&str] = &["it", "this", "that", "they", "these", "those"];
const SUBJECTIVE_TERMS: &[&str] = &["best", "better", "worst", "top", "good"];
const CRITERIA_MARKERS: &[&str] = &["for", "criteria", "based on", "in terms of"];
const RECENCY_TERMS: &[&str] = &["latest", "recent", "current", "new", "newest"];
/// Questions at least this long are assumed to name their own subject.
const REFERENT_WORD_LIMIT: usize = 8;

/// Why a question was judged unclear. Each maps to one clarifying question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityReason {
    Empty,
    TooShort,
    UnresolvedReferent,
    SubjectiveWithoutCriteria,
    UnspecifiedTimeframe,
}

impl AmbiguityReason {
    pub fn describe(&self) -> &'static str {
        match self {
            AmbiguityReason::Empty => "question is empty",
            AmbiguityReason::TooShort => "question is too short to scope",
            AmbiguityReason::UnresolvedReferent => "question refers to something it does not name",
            AmbiguityReason::SubjectiveWithoutCriteria => {
                "question asks for a ranking without stating criteria"
            }
            AmbiguityReason::UnspecifiedTimeframe => "question asks for recent information without a timeframe",
        }
    }

    fn clarifying_question(&self, question: &str) -> String {
        match self {
            AmbiguityReason::Empty => "What would you like to research?".to_string(),
            AmbiguityReason::TooShort => {
                format!("Can you describe in more detail what you want to know about \"{question}\"?")
            }
            AmbiguityReason::UnresolvedReferent => {
                "Which specific subject, product, or topic does the question refer to?".to_string()
            }
            AmbiguityReason::SubjectiveWithoutCriteria => {
                "Which criteria matter most for the comparison (for example cost, performance, or maturity)?"
                    .to_string()
            }
            AmbiguityReason::UnspecifiedTimeframe => {
                "What timeframe should the research cover?".to_string()
            }
        }
    }
}

/// Outcome of [`ClarificationEngine::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarityVerdict {
    pub is_clear: bool,
    pub reasons: Vec<String>,
    #[serde(skip)]
    kinds: Vec<AmbiguityReason>,
}

impl ClarityVerdict {
    pub fn kinds(&self) -> &[AmbiguityReason] {
        &self.kinds
    }
}

/// The clarification record kept on a session that took the detour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationExchange {
    pub question: String,
    pub candidate_clarifications: Vec<String>,
    /// Clarification → response, in the order responses were given.
    pub responses: IndexMap<String, String>,
    pub refined_question: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    /// Set when the question was still unclear after the last attempt.
    #[serde(default)]
    pub degraded: bool,
}

impl ClarificationExchange {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            candidate_clarifications: Vec::new(),
            responses: IndexMap::new(),
            refined_question: None,
            attempts: 0,
            degraded: false,
        }
    }

    /// Question/response pairs collected so far.
    pub fn answered(&self) -> Vec<(String, String)> {
        self.responses
            .iter()
            .map(|(q, r)| (q.clone(), r.clone()))
            .collect()
    }

    /// The refined question, or the original when no refinement happened.
    pub fn effective_question(&self) -> &str {
        self.refined_question.as_deref().unwrap_or(&self.question)
    }
}

/// Stateless question validator and refiner.
#[derive(Debug, Clone)]
pub struct ClarificationEngine {
    min_words: usize,
}

impl ClarificationEngine {
    pub fn new(min_words: usize) -> Self {
        Self { min_words }
    }

    pub fn from_config(config: &ClarificationConfig) -> Self {
        Self::new(config.min_words)
    }

    /// Judge whether `question` is specific enough to research.
    pub fn validate(&self, question: &str) -> ClarityVerdict {
        let kinds = self.detect(question);
        ClarityVerdict {
            is_clear: kinds.is_empty(),
            reasons: kinds.iter().map(|k| k.describe().to_string()).collect(),
            kinds,
        }
    }

    /// Produce between 1 and `max_questions` clarifying questions.
    ///
    /// `context` holds clarifications already asked (with their answers);
    /// those are not asked again. Near-duplicates are collapsed by
    /// normalized equality.
    pub fn generate_questions(
        &self,
        question: &str,
        context: &[(String, String)],
        max_questions: usize,
    ) -> Vec<String> {
        let max_questions = max_questions.max(1);
        let mut seen: HashSet<String> = context.iter().map(|(q, _)| normalize_query(q)).collect();
        let mut questions = Vec::new();

        let candidates = self
            .detect(question)
            .into_iter()
            .map(|kind| kind.clarifying_question(question.trim()))
            .chain(std::iter::once(focus_question(question)));

        for candidate in candidates {
            if questions.len() == max_questions {
                break;
            }
            if seen.insert(normalize_query(&candidate)) {
                questions.push(candidate);
            }
        }

        if questions.is_empty() {
            // Everything was asked already; ask for any remaining detail.
            let fallback = format!(
                "Is there anything else that would narrow down \"{}\"?",
                question.trim()
            );
            questions.push(fallback);
        }
        questions
    }

    /// Fold every answered clarification into one refined question.
    ///
    /// Blank responses are ignored; with nothing answered the original
    /// question is returned unchanged.
    pub fn refine(&self, question: &str, responses: &IndexMap<String, String>) -> String {
        let pairs: Vec<String> = responses
            .iter()
            .filter(|(_, response)| !response.trim().is_empty())
            .map(|(clarification, response)| {
                format!("{} {}", clarification.trim(), response.trim())
            })
            .collect();
        if pairs.is_empty() {
            return question.to_string();
        }
        format!("{} [{}]", question.trim(), pairs.join("; "))
    }

    fn detect(&self, question: &str) -> Vec<AmbiguityReason> {
        let normalized = normalize_query(question);
        if normalized.is_empty() {
            return vec![AmbiguityReason::Empty];
        }

        let words: Vec<&str> = normalized
            .split(' ')
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();
        let has_word = |list: &[&str]| words.iter().any(|w| list.contains(w));

        let mut reasons = Vec::new();
        if words.len() < self.min_words {
            reasons.push(AmbiguityReason::TooShort);
        }
        if words
            .first()
            .is_some_and(|first| VAGUE_REFERENTS.contains(first))
            && words.len() < REFERENT_WORD_LIMIT
        {
            reasons.push(AmbiguityReason::UnresolvedReferent);
        }
        let has_criteria = CRITERIA_MARKERS.iter().any(|marker| {
            if marker.contains(' ') {
                normalized.contains(marker)
            } else {
                words.contains(marker)
            }
        });
        if has_word(SUBJECTIVE_TERMS) && !has_criteria {
            reasons.push(AmbiguityReason::SubjectiveWithoutCriteria);
        }
        let has_year = words
            .iter()
            .any(|w| w.len() == 4 && w.chars().all(|c| c.is_ascii_digit()));
        if has_word(RECENCY_TERMS) && !has_year {
            reasons.push(AmbiguityReason::UnspecifiedTimeframe);
        }
        reasons
    }
}

impl Default for ClarificationEngine {
    fn default() -> Self {
        Self::from_config(&ClarificationConfig::default())
    }
}

fn focus_question(question: &str) -> String {
    format!(
        "Which aspect of \"{}\" should the research focus on?",
        question.trim()
    )
}
