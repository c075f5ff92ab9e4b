use serde::{Deserialize, Serialize};

/// Database primary key value of a session that has never been saved.
pub const UNSAVED_ID: i64 = -1;

/// Session metadata: the relational row plus runtime-only counters.
///
/// `id` is assigned exactly once, on the first database insert. `fid` is
/// assigned exactly once, at first send, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: i64,
    pub fid: Option<String>,
    pub title: String,
    pub model: String,
    /// Unix timestamp of the last completed save.
    pub updated_at: i64,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub duration_seconds: i64,
    /// Content chunks received while the session was inactive. Runtime
    /// only; reset on activation.
    #[serde(skip)]
    pub unread_count: u32,
}

impl SessionMeta {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: UNSAVED_ID,
            fid: None,
            title: String::new(),
            model: model.into(),
            updated_at: 0,
            total_messages: 0,
            total_tokens: 0,
            duration_seconds: 0,
            unread_count: 0,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id != UNSAVED_ID
    }
}
