use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod executor;

pub use executor::{ToolExecutor, ERROR_PREFIX};

/// A model-requested function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The question a tool wants answered before it runs.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub question: String,
    pub target: String,
    pub operation: String,
}

/// Yes/no decision per tool call. Implemented by the consumer (dialog,
/// policy file, test fake); a denial is an expected outcome, not an error.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request(&self, question: &str, target: &str, operation: &str) -> bool;
}

/// Gate that approves everything. Useful for tests and trusted setups.
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn request(&self, _question: &str, _target: &str, _operation: &str) -> bool {
        true
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Build the permission question for this invocation, or `None` when no
    /// permission is needed (e.g. a pure read of already-approved scope).
    fn permission_request(&self, _arguments: &serde_json::Value) -> Option<PermissionRequest> {
        None
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String>;
}

/// Name-keyed tool set for one session. Tools themselves are shared; the
/// registry only maps names to capabilities.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
