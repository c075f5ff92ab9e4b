use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

use crate::message::Message;
use crate::stream::Chunk;

/// Stream of response chunks from the inference API.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// Cooperative cancellation handle passed down the send path. Cloning is
/// cheap; any clone can cancel, all clones observe it. Cancelling with no
/// request in flight is a no-op.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender gone; treat as never-cancelled and park forever so
                // select! callers fall through to the stream arm.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session client configuration: the mutable state copied into a new
/// session, as opposed to the shared transport underneath.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub model: String,
    /// Whether the model is asked to emit a thinking channel.
    pub thinking: bool,
    /// Per-tool enabled flags, keyed by tool name.
    pub tool_enabled: HashMap<String, bool>,
}

impl ClientConfig {
    /// Copy tool-active flags from another config, matched by tool name.
    /// Names absent on our side are a no-op, not an error.
    pub fn copy_tool_flags_from(&mut self, other: &ClientConfig) {
        for (name, enabled) in &other.tool_enabled {
            if let Some(flag) = self.tool_enabled.get_mut(name) {
                *flag = *enabled;
            }
        }
    }
}

/// Opaque streaming chat capability. The engine never inspects transport
/// details, only the chunk shape coming back.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send the outbound (API-compatible) message log and stream back
    /// response chunks. The final chunk has `done == true`.
    async fn send(&self, messages: &[Message], cancel: CancelToken) -> Result<ChunkStream>;

    fn config(&self) -> &ClientConfig;

    fn config_mut(&mut self) -> &mut ClientConfig;

    /// Deep-copy the mutable configuration (model, options, tool flags) for
    /// a new session while sharing the underlying transport. In-flight
    /// request state is never carried over.
    fn clone_for_new_session(&self) -> Box<dyn Connection>;
}
