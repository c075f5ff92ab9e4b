//! Shared fakes for integration tests: a scripted connection that replays
//! canned chunk sequences and records every outbound request.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chat_engine::{
    CancelToken, Chunk, ChunkStream, ClientConfig, Connection, EngineConfig, Message,
    PermissionGate, PermissionRequest, Tool,
};

pub fn test_config(root: &Path) -> EngineConfig {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });

    EngineConfig {
        history_dir: root.to_path_buf(),
        ..EngineConfig::default()
    }
}

/// Replays one scripted chunk sequence per request and records the
/// outbound message log of every request it receives.
pub struct ScriptedConnection {
    config: ClientConfig,
    turns: Arc<Mutex<VecDeque<Vec<Chunk>>>>,
    pub sent: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedConnection {
    pub fn new(turns: Vec<Vec<Chunk>>) -> Self {
        let mut config = ClientConfig::default();
        config.model = "test-model".to_string();
        Self {
            config,
            turns: Arc::new(Mutex::new(turns.into_iter().collect())),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_tools(mut self, names: &[&str]) -> Self {
        for name in names {
            self.config.tool_enabled.insert(name.to_string(), true);
        }
        self
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&self, messages: &[Message], _cancel: CancelToken) -> Result<ChunkStream> {
        self.sent.lock().unwrap().push(messages.to_vec());
        let chunks = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Chunk::done()]);
        Ok(Box::pin(tokio_stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    fn clone_for_new_session(&self) -> Box<dyn Connection> {
        Box::new(Self {
            config: self.config.clone(),
            turns: self.turns.clone(),
            sent: self.sent.clone(),
        })
    }
}

/// Connection whose requests always fail at the transport layer.
pub struct BrokenConnection {
    config: ClientConfig,
}

impl BrokenConnection {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }
}

#[async_trait]
impl Connection for BrokenConnection {
    async fn send(&self, _messages: &[Message], _cancel: CancelToken) -> Result<ChunkStream> {
        bail!("connection refused")
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    fn clone_for_new_session(&self) -> Box<dyn Connection> {
        Box::new(Self {
            config: self.config.clone(),
        })
    }
}

/// File-read stand-in that requires permission for every path.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn permission_request(&self, arguments: &serde_json::Value) -> Option<PermissionRequest> {
        let path = arguments["path"].as_str().unwrap_or_default().to_string();
        Some(PermissionRequest {
            question: format!("Allow reading {path}?"),
            target: path,
            operation: "read".to_string(),
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String> {
        Ok(format!(
            "contents of {}",
            arguments["path"].as_str().unwrap_or_default()
        ))
    }
}

/// Gate that denies paths outside `/approved`.
pub struct ScopedGate;

#[async_trait]
impl PermissionGate for ScopedGate {
    async fn request(&self, _question: &str, target: &str, _operation: &str) -> bool {
        target.starts_with("/approved")
    }
}
