//! Conversational session engine: tracks ongoing chat sessions, merges
//! streamed model output, executes model-requested tool calls under a
//! permission gate, and persists each conversation to a relational store
//! plus a full JSON snapshot.
//!
//! The engine is a library with no transport or UI of its own. Front ends
//! supply the external capabilities as traits: [`connection::Connection`]
//! for the streaming chat API, [`tools::PermissionGate`] for per-call
//! decisions, and [`persistence::TitleGenerator`] for naming sessions.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod message;
pub mod persistence;
pub mod session;
pub mod stream;
pub mod tools;

pub use config::EngineConfig;
pub use connection::{CancelToken, ChunkStream, ClientConfig, Connection};
pub use error::EngineError;
pub use events::{EngineEvent, SessionEvent};
pub use message::{Message, MessageLog, Role};
pub use persistence::{PersistenceStore, SessionMeta, TitleGenerator};
pub use session::{ActiveTarget, Session, SessionManager};
pub use stream::{Chunk, StreamAccumulator, StreamState, StreamUpdate};
pub use tools::{
    PermissionGate, PermissionRequest, Tool, ToolCall, ToolExecutor, ToolRegistry, ERROR_PREFIX,
};
