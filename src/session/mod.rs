//! Session lifecycle: a tagged state per conversation (empty, placeholder,
//! live) plus the streaming send loop with its tool-call continuation.

mod manager;

pub use manager::{ActiveTarget, SessionManager};

use anyhow::{bail, Result};
use chrono::Local;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::connection::{CancelToken, ClientConfig, Connection};
use crate::error::EngineError;
use crate::events::SessionEvent;
use crate::message::{Message, MessageLog};
use crate::persistence::{new_fid, PersistenceStore, SessionMeta, SnapshotV1};
use crate::stream::{StreamAccumulator, StreamState, StreamUpdate};
use crate::tools::{PermissionGate, ToolExecutor, ToolRegistry};

/// Which state a session is in. The placeholder-to-live transition is an
/// explicit state replace performed by the manager, never an in-place
/// mutation of a half-populated session.
#[derive(Debug)]
pub enum SessionKind {
    /// The "no conversation yet" state; promoted on first send.
    Empty,
    /// Metadata loaded from the database without its message body.
    Placeholder,
    /// Fully populated, able to send.
    Live(LiveState),
}

#[derive(Debug, Default)]
pub struct LiveState {
    log: MessageLog,
    accumulator: StreamAccumulator,
    /// Single-writer-per-session save discipline.
    saving: bool,
}

impl LiveState {
    fn from_log(log: MessageLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }
}

/// One conversation. Owns its message log and stream accumulator
/// exclusively; the shared [`PersistenceStore`] is only borrowed during a
/// save.
pub struct Session {
    meta: SessionMeta,
    kind: SessionKind,
    connection: Box<dyn Connection>,
    event_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Session {
    /// The singleton "no conversation yet" state.
    pub fn new_empty(connection: Box<dyn Connection>) -> Self {
        let model = connection.config().model.clone();
        Self {
            meta: SessionMeta::new(model),
            kind: SessionKind::Empty,
            connection,
            event_tx: None,
        }
    }

    /// A live session with an empty log, fid already assigned.
    pub(crate) fn new_live(meta: SessionMeta, connection: Box<dyn Connection>) -> Self {
        Self {
            meta,
            kind: SessionKind::Live(LiveState::default()),
            connection,
            event_tx: None,
        }
    }

    /// A placeholder around a metadata row loaded from the database.
    pub(crate) fn new_placeholder(meta: SessionMeta, connection: Box<dyn Connection>) -> Self {
        Self {
            meta,
            kind: SessionKind::Placeholder,
            connection,
            event_tx: None,
        }
    }

    /// Consume this placeholder, producing the populated live session.
    /// Database metadata wins; the snapshot contributes only the message
    /// body.
    pub(crate) fn into_live(mut self, snapshot: SnapshotV1) -> Self {
        self.kind = SessionKind::Live(LiveState::from_log(MessageLog::from_messages(
            snapshot.messages,
        )));
        self
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn fid(&self) -> Option<&str> {
        self.meta.fid.as_deref()
    }

    pub fn is_live(&self) -> bool {
        matches!(self.kind, SessionKind::Live(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, SessionKind::Placeholder)
    }

    /// Whether stream events are currently relayed to an observer.
    pub fn is_active(&self) -> bool {
        self.event_tx.is_some()
    }

    /// The persistence log, when live.
    pub fn log(&self) -> Option<&MessageLog> {
        match &self.kind {
            SessionKind::Live(state) => Some(&state.log),
            _ => None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        self.connection.config()
    }

    pub fn config_mut(&mut self) -> &mut ClientConfig {
        self.connection.config_mut()
    }

    pub(crate) fn clone_connection(&self) -> Box<dyn Connection> {
        self.connection.clone_for_new_session()
    }

    /// Attach the event relay. Activation resets the unread counter.
    pub(crate) fn set_event_sink(&mut self, tx: mpsc::UnboundedSender<SessionEvent>) {
        self.event_tx = Some(tx);
        self.meta.unread_count = 0;
    }

    pub(crate) fn clear_event_sink(&mut self) {
        self.event_tx = None;
    }

    /// Send one user message and drive the turn to completion: stream the
    /// response, run any requested tool calls under the permission gate,
    /// resend, and persist once a turn finishes without tool calls.
    ///
    /// Cancellation stops chunk application and tool execution, leaves the
    /// log in its partial state, and skips the save.
    pub async fn send(
        &mut self,
        store: &PersistenceStore,
        registry: &ToolRegistry,
        gate: &dyn PermissionGate,
        text: String,
        cancel: CancelToken,
    ) -> Result<String> {
        let events = self.event_tx.clone();
        let state = match &mut self.kind {
            SessionKind::Live(state) => state,
            SessionKind::Empty => bail!("Cannot send through the empty session directly"),
            SessionKind::Placeholder => {
                bail!("Placeholder must be loaded before sending")
            }
        };

        if self.meta.fid.is_none() {
            let fid = new_fid(Local::now());
            tracing::info!("Session assigned fid {}", fid);
            self.meta.fid = Some(fid);
        }

        let started = std::time::Instant::now();
        state.log.push(Message::user(text));
        let mut response_text = String::new();

        loop {
            let outbound = state.log.outbound();
            emit(&events, SessionEvent::StreamStarted);

            let mut stream = match self.connection.send(&outbound, cancel.clone()).await {
                Ok(stream) => stream,
                Err(e) => return Err(EngineError::Transport(e).into()),
            };

            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = stream.next() => item,
                };
                let Some(item) = item else { break };

                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        // Keep whatever partial text existed; do not save.
                        if let Some(partial) = state.accumulator.take_partial() {
                            state.log.push(partial);
                        }
                        return Err(EngineError::Transport(e).into());
                    }
                };

                match state.accumulator.apply(chunk) {
                    StreamUpdate::Thinking(delta) => {
                        emit(&events, SessionEvent::ThinkingDelta(delta));
                    }
                    StreamUpdate::Content(delta) => {
                        if events.is_some() {
                            emit(&events, SessionEvent::ContentDelta(delta));
                        } else {
                            self.meta.unread_count += 1;
                        }
                    }
                    StreamUpdate::Finished { .. } => {}
                    StreamUpdate::Ignored => {}
                }

                if state.accumulator.state() == StreamState::Done {
                    break;
                }
            }

            if cancel.is_cancelled() {
                if let Some(partial) = state.accumulator.take_partial() {
                    response_text.push_str(&partial.content);
                    state.log.push(partial);
                }
                emit(&events, SessionEvent::StreamDone);
                tracing::info!(
                    "Send cancelled for session {}",
                    self.meta.fid.as_deref().unwrap_or("?")
                );
                return Ok(response_text);
            }

            let (message, calls) = state.accumulator.finish();
            response_text.push_str(&message.content);
            state.log.push(message);
            emit(&events, SessionEvent::StreamDone);

            if calls.is_empty() {
                break;
            }

            let executor = ToolExecutor::new(registry, gate);
            let transcript = executor
                .execute_batch(&calls, &cancel, events.as_ref())
                .await;
            for message in transcript {
                state.log.push(message);
            }

            if cancel.is_cancelled() {
                return Ok(response_text);
            }
        }

        self.meta.duration_seconds += started.elapsed().as_secs() as i64;

        if state.saving {
            tracing::warn!(
                "Save already outstanding for session {}, skipping",
                self.meta.fid.as_deref().unwrap_or("?")
            );
        } else {
            state.saving = true;
            // Save failures are recoverable: the in-memory log is not
            // rolled back, so the next completed turn retries.
            match store.save_session(&mut self.meta, &mut state.log).await {
                Ok(()) => emit(&events, SessionEvent::Saved),
                Err(e) => tracing::warn!(
                    "Persisting session {} failed: {:#}",
                    self.meta.fid.as_deref().unwrap_or("?"),
                    e
                ),
            }
            state.saving = false;
        }

        Ok(response_text)
    }
}

fn emit(events: &Option<mpsc::UnboundedSender<SessionEvent>>, event: SessionEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
