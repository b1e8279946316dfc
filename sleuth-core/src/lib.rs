//! # Sleuth Core
//!
//! Round-based research orchestration. A mode controller drives each
//! session through select → execute → analyze rounds; a tool coordinator
//! fans calls out under a concurrency limit, consulting a shared TTL/LRU
//! result cache and a shared source ledger so repeated work is skipped.

pub mod cache;
pub mod clarification;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod maintenance;
pub mod mock;
pub mod optimizer;
pub mod orchestrator;
pub mod persistence;
pub mod session;
pub mod tools;
pub mod types;

// Re-export commonly used types at the crate root.
pub use cache::{CacheStats, CacheStore, ResultCache, cache_key, normalize_query};
pub use clarification::{ClarificationEngine, ClarificationExchange, ClarityVerdict};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ModeBudget, SleuthConfig, load_config};
pub use coordinator::ToolCoordinator;
pub use error::{Result, SleuthError};
pub use ledger::{Source, SourceLedger, SourceMetadata};
pub use maintenance::MaintenanceTask;
pub use optimizer::{PerformanceTracker, ToolPerformance, order_queries};
pub use orchestrator::{AnalysisProvider, ClarificationResponder, ModeController};
pub use session::{ResearchCallback, Round, Session, SessionStatus, SessionSummary};
pub use tools::{ResearchTool, ToolRegistry};
pub use types::{CachedResult, OutcomeStatus, ResearchMode, ToolCall, ToolOutcome, ToolResponse};
