use anyhow::Result;
use chrono::Local;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::connection::{CancelToken, ClientConfig, Connection};
use crate::error::EngineError;
use crate::events::{engine_channel, EngineEvent, SessionEvent};
use crate::persistence::{new_fid, PersistenceStore, SessionMeta};
use crate::session::Session;
use crate::tools::{PermissionGate, ToolRegistry};

/// What the manager considers "active": the empty session or a registered
/// one. At most one target receives the event relay at any instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveTarget {
    Empty,
    Session(String),
}

/// The session registry: creates, activates, loads, and deletes sessions,
/// and relays the active session's stream events to subscribers.
///
/// The manager owns every [`Session`] exclusively and never mutates a
/// session's log itself; it only reads metadata to render lists.
pub struct SessionManager {
    store: Arc<PersistenceStore>,
    registry: Arc<ToolRegistry>,
    gate: Arc<dyn PermissionGate>,
    sessions: HashMap<String, Session>,
    active: ActiveTarget,
    empty: Session,
    events: broadcast::Sender<EngineEvent>,
    relay: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// `connection` becomes the prototype: the empty session holds it, and
    /// every new session starts from a `clone_for_new_session` of the
    /// current conversation's connection.
    pub fn new(
        store: Arc<PersistenceStore>,
        registry: Arc<ToolRegistry>,
        gate: Arc<dyn PermissionGate>,
        connection: Box<dyn Connection>,
    ) -> Self {
        Self {
            store,
            registry,
            gate,
            sessions: HashMap::new(),
            active: ActiveTarget::Empty,
            empty: Session::new_empty(connection),
            events: engine_channel(),
            relay: None,
        }
    }

    /// Subscribe to registry and relayed stream events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn active_target(&self) -> &ActiveTarget {
        &self.active
    }

    pub fn get(&self, fid: &str) -> Option<&Session> {
        self.sessions.get(fid)
    }

    /// Client configuration of the empty session, for model/tool selection
    /// before the first send.
    pub fn empty_config_mut(&mut self) -> &mut ClientConfig {
        self.empty.config_mut()
    }

    /// Client configuration of a registered session.
    pub fn session_config_mut(&mut self, fid: &str) -> Option<&mut ClientConfig> {
        self.sessions.get_mut(fid).map(|s| s.config_mut())
    }

    /// Session metadata for list rendering, most recently updated first.
    pub fn session_metas(&self) -> Vec<&SessionMeta> {
        let mut metas: Vec<_> = self.sessions.values().map(|s| s.meta()).collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        metas
    }

    /// Bulk-load metadata rows as placeholders. Message bodies stay on
    /// disk until a placeholder is loaded. Fids already registered keep
    /// their in-memory state.
    pub async fn load_sessions(&mut self) -> Result<usize> {
        let rows = self.store.list_sessions().await?;
        let mut added = 0usize;
        for meta in rows {
            let Some(fid) = meta.fid.clone() else { continue };
            if self.sessions.contains_key(&fid) {
                continue;
            }
            let connection = self.empty.clone_connection();
            self.sessions
                .insert(fid.clone(), Session::new_placeholder(meta, connection));
            added += 1;
        }
        tracing::info!("Loaded {} session placeholder(s)", added);
        Ok(added)
    }

    /// Register a new live session around a freshly cloned connection.
    /// This is the first-send moment, so the fid is allocated here and
    /// never changes afterwards.
    pub fn create_session(&mut self, connection: Box<dyn Connection>) -> String {
        let mut now = Local::now();
        let mut fid = new_fid(now);
        while self.sessions.contains_key(&fid) {
            now += chrono::Duration::seconds(1);
            fid = new_fid(now);
        }

        let mut meta = SessionMeta::new(connection.config().model.clone());
        meta.fid = Some(fid.clone());
        self.sessions
            .insert(fid.clone(), Session::new_live(meta, connection));
        let _ = self.events.send(EngineEvent::SessionAdded { fid: fid.clone() });
        tracing::info!("Session {} created", fid);
        fid
    }

    /// Switch the event relay to another target. Redundant switches are
    /// no-ops. Switching to the empty session copies the outgoing
    /// session's model, thinking mode, and per-tool flags forward.
    pub fn switch_active(&mut self, target: ActiveTarget) -> Result<()> {
        if self.active == target {
            return Ok(());
        }
        if let ActiveTarget::Session(fid) = &target {
            if !self.sessions.contains_key(fid) {
                return Err(EngineError::UnknownSession(fid.clone()).into());
            }
        }

        // Detach the outgoing relay.
        let outgoing_config = match &self.active {
            ActiveTarget::Empty => None,
            ActiveTarget::Session(fid) => {
                let config = self.sessions.get_mut(fid).map(|session| {
                    session.clear_event_sink();
                    session.config().clone()
                });
                let _ = self.events.send(EngineEvent::SessionDeactivated {
                    fid: Some(fid.clone()),
                });
                config
            }
        };
        self.relay = None;

        match &target {
            ActiveTarget::Empty => {
                if let Some(config) = outgoing_config {
                    let mine = self.empty.config_mut();
                    mine.model = config.model.clone();
                    mine.thinking = config.thinking;
                    mine.copy_tool_flags_from(&config);
                }
                let _ = self
                    .events
                    .send(EngineEvent::SessionActivated { fid: None });
            }
            ActiveTarget::Session(fid) => {
                let session = self
                    .sessions
                    .get_mut(fid)
                    .expect("existence checked above");
                let (tx, rx) = mpsc::unbounded_channel();
                session.set_event_sink(tx);
                self.relay = Some(spawn_relay(fid.clone(), rx, self.events.clone()));
                let _ = self.events.send(EngineEvent::SessionActivated {
                    fid: Some(fid.clone()),
                });
            }
        }

        self.active = target;
        Ok(())
    }

    /// Promote a placeholder to a live session by reading its snapshot.
    /// On any read or decode failure the placeholder stays registered and
    /// untouched. Loading an already-live session is a no-op.
    pub async fn load_session(&mut self, fid: &str) -> Result<()> {
        match self.sessions.get(fid) {
            None => return Err(EngineError::UnknownSession(fid.to_string()).into()),
            Some(session) if session.is_live() => return Ok(()),
            Some(_) => {}
        }

        let snapshot = self.store.load_snapshot(fid).await?;

        // Explicit state replace: the placeholder leaves the registry only
        // once the snapshot decoded successfully.
        let placeholder = self
            .sessions
            .remove(fid)
            .expect("placeholder checked above");
        let was_active = self.active == ActiveTarget::Session(fid.to_string());
        let mut live = placeholder.into_live(snapshot);
        if was_active {
            // Reattach the relay that pointed at the placeholder.
            let (tx, rx) = mpsc::unbounded_channel();
            live.set_event_sink(tx);
            self.relay = Some(spawn_relay(fid.to_string(), rx, self.events.clone()));
        }
        self.sessions.insert(fid.to_string(), live);
        tracing::info!("Placeholder {} promoted to live session", fid);
        Ok(())
    }

    /// Send through the active target. A send through the empty session
    /// atomically creates the real session (inheriting the empty's client
    /// configuration), activates it, and proceeds as a normal send.
    pub async fn send_active(&mut self, text: String, cancel: CancelToken) -> Result<String> {
        let fid = match &self.active {
            ActiveTarget::Empty => {
                let connection = self.empty.clone_connection();
                let fid = self.create_session(connection);
                self.switch_active(ActiveTarget::Session(fid.clone()))?;
                fid
            }
            ActiveTarget::Session(fid) => fid.clone(),
        };
        self.send_to(&fid, text, cancel).await
    }

    /// Send through a specific session, loading it first if it is still a
    /// placeholder. An inactive session accumulates unread counts instead
    /// of relaying content events.
    pub async fn send_to(
        &mut self,
        fid: &str,
        text: String,
        cancel: CancelToken,
    ) -> Result<String> {
        if self
            .sessions
            .get(fid)
            .ok_or_else(|| EngineError::UnknownSession(fid.to_string()))?
            .is_placeholder()
        {
            self.load_session(fid).await?;
        }

        let session = self
            .sessions
            .get_mut(fid)
            .expect("session checked above");
        let result = session
            .send(
                self.store.as_ref(),
                self.registry.as_ref(),
                self.gate.as_ref(),
                text,
                cancel,
            )
            .await;

        if result.is_ok() {
            let _ = self.events.send(EngineEvent::SessionUpdated {
                fid: fid.to_string(),
            });
        }
        result
    }

    /// Remove a session from the registry, database, and disk.
    pub async fn delete_session(&mut self, fid: &str) -> Result<()> {
        let session = self
            .sessions
            .get(fid)
            .ok_or_else(|| EngineError::UnknownSession(fid.to_string()))?;
        self.store.delete_session(session.meta()).await?;
        self.sessions.remove(fid);

        if self.active == ActiveTarget::Session(fid.to_string()) {
            self.relay = None;
            self.active = ActiveTarget::Empty;
            let _ = self
                .events
                .send(EngineEvent::SessionActivated { fid: None });
        }
        let _ = self.events.send(EngineEvent::SessionRemoved {
            fid: fid.to_string(),
        });
        tracing::info!("Session {} deleted", fid);
        Ok(())
    }
}

/// Forward one session's stream events into the engine-wide channel. Ends
/// when the session's sink is dropped.
fn spawn_relay(
    fid: String,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    events: broadcast::Sender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let _ = events.send(EngineEvent::Session {
                fid: fid.clone(),
                event,
            });
        }
    })
}
