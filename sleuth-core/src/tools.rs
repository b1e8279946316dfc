//! Research tool interface and registry.
//!
//! A tool is anything that can answer a query string asynchronously:
//! web search, academic search, document retrieval. The core only knows
//! tools by name; the registry maps names to implementations.

use crate::error::ToolError;
use crate::types::ToolResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trait that all research tools must implement.
///
/// Implementations must be safe to call concurrently. The coordinator drops
/// the future when the call exceeds its timeout, so late results are lost.
#[async_trait]
pub trait ResearchTool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// Answer `query`. `timeout` is the budget the coordinator will enforce.
    ///
    /// Return [`ToolError::Transient`] for retryable failures such as rate
    /// limits; any other error is recorded without retry.
    async fn execute(&self, query: &str, timeout: Duration) -> Result<ToolResponse, ToolError>;

    /// Maximum execution time the tool declares for itself.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// How long a successful result may be served from cache. `None` uses
    /// the configured default.
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }
}

/// The tool registry holds all registered research tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ResearchTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Returns error if a tool with the same name is already registered.
    pub fn register(&mut self, tool: Arc<dyn ResearchTool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered { name });
        }
        debug!(tool = %name, "Registering research tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> Result<(), ToolError> {
        if self.tools.remove(name).is_none() {
            return Err(ToolError::NotFound {
                name: name.to_string(),
            });
        }
        debug!(tool = %name, "Unregistered research tool");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ResearchTool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTool;

    #[test]
    fn test_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(MockTool::new("web_search")))
            .unwrap();
        registry
            .register(Arc::new(MockTool::new("academic_search")))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("web_search").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(
            registry.list_names(),
            vec!["academic_search".to_string(), "web_search".to_string()]
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(MockTool::new("web_search")))
            .unwrap();
        let err = registry
            .register(Arc::new(MockTool::new("web_search")))
            .unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRegistered { .. }));
    }

    #[test]
    fn test_unregister() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(MockTool::new("web_search")))
            .unwrap();
        registry.unregister("web_search").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.unregister("web_search"),
            Err(ToolError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_default_timeout_and_ttl() {
        let tool = MockTool::new("web_search");
        assert_eq!(tool.timeout(), Duration::from_secs(30));
        assert!(tool.cache_ttl().is_none());
        let response = tool.execute("rust", Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.payload["query"], "rust");
    }
}
