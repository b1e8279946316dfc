//! Configuration system for Sleuth.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/sleuth/config.toml` and/or `.sleuth/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ledger::ReliabilityTable;
use crate::types::ResearchMode;

/// Top-level configuration for the research core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleuthConfig {
    pub research: ResearchConfig,
    pub modes: ModeBudgets,
    pub cache: CacheConfig,
    pub ledger: LedgerConfig,
    pub coordinator: CoordinatorConfig,
    pub retry: RetryConfig,
    pub maintenance: MaintenanceConfig,
}

impl SleuthConfig {
    /// Check numeric ranges and the mode budget ordering.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.research.quality_threshold) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "research.quality_threshold must be within [0, 1], got {}",
                    self.research.quality_threshold
                ),
            });
        }
        if self.coordinator.concurrency_limit == 0 {
            return Err(ConfigError::Invalid {
                message: "coordinator.concurrency_limit must be at least 1".into(),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                message: "retry.backoff_multiplier must be >= 1.0".into(),
            });
        }
        self.ledger
            .reliability
            .validate()
            .map_err(|message| ConfigError::Invalid {
                message: format!("ledger.reliability: {message}"),
            })?;
        self.modes.validate()
    }
}

/// Orchestration settings shared by every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Queries targeting a known URL with at least this quality are skipped.
    pub quality_threshold: f64,
    pub clarification: ClarificationConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.7,
            clarification: ClarificationConfig::default(),
        }
    }
}

/// Settings for the pre-round clarification detour (deep mode only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarificationConfig {
    pub enabled: bool,
    /// Upper bound on clarifying questions generated per attempt.
    pub max_questions: usize,
    /// Validate/refine cycles before the session proceeds degraded.
    pub max_attempts: u32,
    /// Questions with fewer words are considered under-specified.
    pub min_words: usize,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_questions: 3,
            max_attempts: 2,
            min_words: 4,
        }
    }
}

/// Round and tool budget for a single research mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeBudget {
    pub max_rounds: usize,
    pub min_tools: usize,
    pub max_tools: usize,
    /// Re-query sources that are already known with sufficient quality.
    #[serde(default)]
    pub allow_reverification: bool,
}

impl ModeBudget {
    pub const fn new(max_rounds: usize, min_tools: usize, max_tools: usize) -> Self {
        Self {
            max_rounds,
            min_tools,
            max_tools,
            allow_reverification: false,
        }
    }
}

/// The fixed-shape mode table. Depth must strictly increase both budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeBudgets {
    pub instant: ModeBudget,
    pub quick: ModeBudget,
    pub standard: ModeBudget,
    pub deep: ModeBudget,
}

impl Default for ModeBudgets {
    fn default() -> Self {
        Self {
            instant: ModeBudget::new(1, 1, 2),
            quick: ModeBudget::new(2, 2, 3),
            standard: ModeBudget::new(3, 3, 5),
            deep: ModeBudget::new(4, 5, 10),
        }
    }
}

impl ModeBudgets {
    pub fn budget_for(&self, mode: ResearchMode) -> ModeBudget {
        match mode {
            ResearchMode::Instant => self.instant,
            ResearchMode::Quick => self.quick,
            ResearchMode::Standard => self.standard,
            ResearchMode::Deep => self.deep,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut previous: Option<(ResearchMode, ModeBudget)> = None;
        for mode in ResearchMode::all() {
            let budget = self.budget_for(mode);
            if budget.max_rounds == 0 || budget.min_tools == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("mode '{mode}' must allow at least one round and one tool"),
                });
            }
            if budget.min_tools > budget.max_tools {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "mode '{mode}' has min_tools {} above max_tools {}",
                        budget.min_tools, budget.max_tools
                    ),
                });
            }
            if let Some((prev_mode, prev)) = previous {
                if budget.max_rounds <= prev.max_rounds || budget.max_tools <= prev.max_tools {
                    return Err(ConfigError::Invalid {
                        message: format!(
                            "mode '{mode}' must exceed '{prev_mode}' in both max_rounds and max_tools"
                        ),
                    });
                }
            }
            previous = Some((mode, budget));
        }
        Ok(())
    }
}

/// Result cache limits and TTLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_bytes: usize,
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    /// Per-tool TTL overrides, keyed by tool name.
    pub tool_ttl_secs: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_entries: 10_000,
            default_ttl_secs: 3600,
            tool_ttl_secs: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Configured override for `tool_name`, if any.
    pub fn ttl_override(&self, tool_name: &str) -> Option<Duration> {
        self.tool_ttl_secs
            .get(tool_name)
            .map(|secs| Duration::from_secs(*secs))
    }
}

/// Source ledger retention and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Sources not observed for this long are pruned.
    pub retention_secs: u64,
    /// A URL query observed within this window is not fetched again.
    pub freshness_window_secs: u64,
    pub reliability: ReliabilityTable,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_secs: 7 * 24 * 3600,
            freshness_window_secs: 3600,
            reliability: ReliabilityTable::default(),
        }
    }
}

impl LedgerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }
}

/// Tool fan-out limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub concurrency_limit: usize,
    pub per_call_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            per_call_timeout_ms: 30_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }
}

/// Retry policy for transient tool errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Add up to 25% random jitter to each backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
            jitter: false,
        }
    }
}

/// Background sweep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SLEUTH_`)
/// 3. Workspace-local config (`.sleuth/config.toml`)
/// 4. User config (`~/.config/sleuth/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SleuthConfig>,
) -> Result<SleuthConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(SleuthConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "sleuth", "sleuth") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".sleuth").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // SLEUTH_CACHE__MAX_BYTES, SLEUTH_COORDINATOR__CONCURRENCY_LIMIT, ...
    figment = figment.merge(Env::prefixed("SLEUTH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load a single config file on top of the defaults and validate the result.
pub fn load_config_file(path: &Path) -> Result<SleuthConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let config: SleuthConfig = Figment::from(Serialized::defaults(SleuthConfig::default()))
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}
