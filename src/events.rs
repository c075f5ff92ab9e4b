//! Typed event channels replacing per-property observer callbacks: the
//! manager publishes on a broadcast channel, front ends subscribe.

use tokio::sync::broadcast;

/// Events emitted by a session while a turn is in flight. Relayed to the
/// engine-wide channel only while the session is active.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A response stream opened.
    StreamStarted,
    /// New thinking text from the model.
    ThinkingDelta(String),
    /// New content text from the model.
    ContentDelta(String),
    /// The response stream completed.
    StreamDone,
    /// A tool execution began.
    ToolStarted { name: String },
    /// A tool execution finished.
    ToolFinished { name: String, success: bool },
    /// A UI diagnostic was appended to the persistence log.
    Diagnostic(String),
    /// The session was persisted.
    Saved,
}

/// Registry-level events published by the [`SessionManager`].
///
/// [`SessionManager`]: crate::session::SessionManager
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SessionAdded { fid: String },
    SessionActivated { fid: Option<String> },
    SessionDeactivated { fid: Option<String> },
    SessionRemoved { fid: String },
    SessionUpdated { fid: String },
    /// Relay of the active session's stream events.
    Session { fid: String, event: SessionEvent },
}

/// Capacity of the engine broadcast channel. Slow subscribers lag rather
/// than block the engine.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

pub(crate) fn engine_channel() -> broadcast::Sender<EngineEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
