//! Source ledger: deduplicated record of every URL a tool has surfaced.
//!
//! Each observation updates the source's counters and recomputes its
//! quality score from a static reliability table plus a capped
//! corroboration bonus. The ledger is shared by all sessions.

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::error::Result;
use crate::persistence::{atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Bonus per repeated observation.
const CORROBORATION_STEP: f64 = 0.05;
/// Observations beyond the first that still earn a bonus.
const CORROBORATION_CAP: u64 = 4;

/// One externally observed URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub seen_count: u64,
    pub tool_names: BTreeSet<String>,
    /// Reliability estimate in `[0, 1]`.
    pub quality_score: f64,
}

/// Extra facts a tool reports alongside a URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
}

impl SourceMetadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }
}

/// Static per-domain and per-tool reliability scores.
///
/// Domain keys match the host exactly or any of its subdomains; keys that
/// start with `.` match by suffix (`.edu`). The most specific match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityTable {
    pub domains: HashMap<String, f64>,
    pub tools: HashMap<String, f64>,
    pub default_score: f64,
}

impl Default for ReliabilityTable {
    fn default() -> Self {
        let domains = [
            ("arxiv.org", 0.9),
            ("doi.org", 0.9),
            ("nature.com", 0.9),
            ("acm.org", 0.85),
            ("ieee.org", 0.85),
            (".edu", 0.85),
            (".gov", 0.85),
            ("wikipedia.org", 0.7),
            ("github.com", 0.7),
            ("docs.rs", 0.75),
            ("stackoverflow.com", 0.65),
            ("medium.com", 0.45),
            ("reddit.com", 0.4),
        ];
        let tools = [
            ("arxiv_search", 0.85),
            ("academic_search", 0.8),
            ("document_retrieval", 0.65),
            ("web_fetch", 0.55),
            ("web_search", 0.5),
        ];
        Self {
            domains: domains
                .into_iter()
                .map(|(d, s)| (d.to_string(), s))
                .collect(),
            tools: tools.into_iter().map(|(t, s)| (t.to_string(), s)).collect(),
            default_score: 0.5,
        }
    }
}

impl ReliabilityTable {
    /// Score of the most specific domain entry matching `host`.
    pub fn domain_score(&self, host: &str) -> Option<f64> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domains
            .iter()
            .filter(|(domain, _)| {
                if domain.starts_with('.') {
                    host.ends_with(domain.as_str())
                } else {
                    host == domain.as_str() || host.ends_with(&format!(".{domain}"))
                }
            })
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, score)| *score)
    }

    /// Best score among the tools that surfaced a source.
    pub fn tool_score<'a>(&self, tools: impl IntoIterator<Item = &'a String>) -> Option<f64> {
        tools
            .into_iter()
            .filter_map(|tool| self.tools.get(tool).copied())
            .reduce(f64::max)
    }

    /// Base score: domain table, else the best of the tool table and the
    /// default. Never drops as `tools` grows.
    pub fn base_score(&self, url: &str, tools: &BTreeSet<String>) -> f64 {
        host_of(url)
            .and_then(|host| self.domain_score(&host))
            .unwrap_or_else(|| {
                self.tool_score(tools)
                    .map_or(self.default_score, |t| t.max(self.default_score))
            })
    }

    /// Every score must lie in `[0, 1]`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let out_of_range = |s: &f64| !(0.0..=1.0).contains(s);
        if out_of_range(&self.default_score) {
            return Err(format!("default_score {} outside [0, 1]", self.default_score));
        }
        if let Some((name, score)) = self
            .domains
            .iter()
            .chain(self.tools.iter())
            .find(|(_, s)| out_of_range(s))
        {
            return Err(format!("score {score} for '{name}' outside [0, 1]"));
        }
        Ok(())
    }
}

/// Deterministic quality score for a source.
pub fn quality_score(table: &ReliabilityTable, url: &str, tools: &BTreeSet<String>, seen_count: u64) -> f64 {
    let bonus = CORROBORATION_STEP * seen_count.saturating_sub(1).min(CORROBORATION_CAP) as f64;
    (table.base_score(url, tools) + bonus).clamp(0.0, 1.0)
}

/// Canonical form used as the ledger key.
///
/// Parseable URLs are normalized by the `url` crate (lowercase scheme and
/// host, explicit root path, no fragment); anything else is only trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Whether `query` is an absolute http(s) URL.
pub fn is_url(query: &str) -> bool {
    url::Url::parse(query.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

fn host_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Thread-safe URL ledger shared across sessions.
pub struct SourceLedger {
    sources: Mutex<HashMap<String, Source>>,
    table: ReliabilityTable,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl SourceLedger {
    pub fn new() -> Self {
        Self::from_config(&LedgerConfig::default(), Arc::new(SystemClock))
    }

    pub fn from_config(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            table: config.reliability.clone(),
            retention: config.retention(),
            clock,
        }
    }

    /// Insert or update the source for `url`.
    pub async fn record(&self, url: &str, tool_name: &str, metadata: SourceMetadata) -> Source {
        let key = canonical_url(url);
        let now = self.clock.now();
        let mut sources = self.sources.lock().await;

        let source = sources.entry(key.clone()).or_insert_with(|| Source {
            url: key.clone(),
            title: None,
            first_seen_at: now,
            last_seen_at: now,
            seen_count: 0,
            tool_names: BTreeSet::new(),
            quality_score: 0.0,
        });

        source.seen_count += 1;
        source.last_seen_at = now.max(source.last_seen_at);
        source.tool_names.insert(tool_name.to_string());
        if let Some(title) = metadata.title.filter(|t| !t.trim().is_empty()) {
            source.title = Some(title);
        }
        source.quality_score =
            quality_score(&self.table, &source.url, &source.tool_names, source.seen_count)
                .max(source.quality_score);

        debug!(
            url = %source.url,
            tool = %tool_name,
            seen_count = source.seen_count,
            quality = source.quality_score,
            "Recorded source"
        );
        source.clone()
    }

    pub async fn was_seen(&self, url: &str) -> bool {
        self.sources.lock().await.contains_key(&canonical_url(url))
    }

    /// Quality of a known source, or 0.0 when unknown.
    pub async fn quality_of(&self, url: &str) -> f64 {
        self.sources
            .lock()
            .await
            .get(&canonical_url(url))
            .map(|s| s.quality_score)
            .unwrap_or(0.0)
    }

    pub async fn get(&self, url: &str) -> Option<Source> {
        self.sources.lock().await.get(&canonical_url(url)).cloned()
    }

    /// Whether `url` was observed within `max_age` of now.
    pub async fn has_fresh_coverage(&self, url: &str, max_age: Duration) -> bool {
        let now = self.clock.now();
        self.sources
            .lock()
            .await
            .get(&canonical_url(url))
            .and_then(|s| (now - s.last_seen_at).to_std().ok())
            .is_some_and(|age| age < max_age)
    }

    /// Sources ordered by first observation; `since` keeps only those seen at or after it.
    pub async fn history(&self, since: Option<DateTime<Utc>>) -> Vec<Source> {
        let sources = self.sources.lock().await;
        let mut history: Vec<Source> = sources
            .values()
            .filter(|s| since.is_none_or(|cutoff| s.last_seen_at >= cutoff))
            .cloned()
            .collect();
        history.sort_by(|a, b| {
            a.first_seen_at
                .cmp(&b.first_seen_at)
                .then_with(|| a.url.cmp(&b.url))
        });
        history
    }

    /// Known sources for `urls`, deduplicated, in first-appearance order.
    pub async fn sources_for<'a>(&self, urls: impl IntoIterator<Item = &'a str>) -> Vec<Source> {
        let sources = self.sources.lock().await;
        let mut seen = HashSet::new();
        urls.into_iter()
            .map(canonical_url)
            .filter(|key| seen.insert(key.clone()))
            .filter_map(|key| sources.get(&key).cloned())
            .collect()
    }

    /// Remove sources last seen before `older_than`. Returns the count removed.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> usize {
        let mut sources = self.sources.lock().await;
        let before = sources.len();
        sources.retain(|_, s| s.last_seen_at >= older_than);
        let removed = before - sources.len();
        if removed > 0 {
            info!(removed, remaining = sources.len(), "Pruned source ledger");
        }
        removed
    }

    /// Prune using the configured retention horizon.
    pub async fn prune_expired(&self) -> usize {
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        match self.clock.now().checked_sub_signed(retention) {
            Some(cutoff) => self.prune(cutoff).await,
            None => 0,
        }
    }

    pub async fn len(&self) -> usize {
        self.sources.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.lock().await.is_empty()
    }

    /// Persist every source as a JSON array.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.history(None).await;
        atomic_write_json(path, &snapshot)?;
        Ok(())
    }

    /// Merge a snapshot into the ledger, keeping whichever copy of a URL
    /// was seen most recently. Returns the number of sources read.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize> {
        let Some(snapshot) = load_json::<Vec<Source>>(path)? else {
            return Ok(0);
        };
        let count = snapshot.len();
        let mut sources = self.sources.lock().await;
        for source in snapshot {
            let key = canonical_url(&source.url);
            match sources.get(&key) {
                Some(existing) if existing.last_seen_at >= source.last_seen_at => {}
                _ => {
                    sources.insert(key, source);
                }
            }
        }
        Ok(count)
    }
}

impl Default for SourceLedger {
    fn default() -> Self {
        Self::new()
    }
}
