use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Message roles. Only the API-compatible subset is ever sent back to the
/// inference API; the remaining roles exist for UI display and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    System,
    User,
    UserSent,
    Assistant,
    Tool,
    ThinkStream,
    ContentStream,
    EndStream,
    Ui,
    UiWarning,
}

impl Role {
    /// Whether messages with this role belong in an outbound request.
    pub fn is_api_compatible(&self) -> bool {
        matches!(self, Role::System | Role::User | Role::Assistant | Role::Tool)
    }
}

/// One entry in a session's history. Immutable once finalized; the role
/// never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Unix timestamp of creation.
    pub timestamp: i64,
    /// Transient rendering hint. Never serialized; cleared after each
    /// snapshot write so a reloaded log compares equal to the saved one.
    #[serde(skip)]
    pub include_extra_info: bool,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            thinking: None,
            tool_call_id: None,
            tool_name: None,
            timestamp: Utc::now().timestamp(),
            include_extra_info: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// A tool reply carrying the result (or error text) for one tool call.
    pub fn tool_reply(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg
    }

    pub fn ui(content: impl Into<String>) -> Self {
        Self::with_role(Role::Ui, content.into())
    }

    pub fn ui_warning(content: impl Into<String>) -> Self {
        Self::with_role(Role::UiWarning, content.into())
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        let t = thinking.into();
        self.thinking = if t.is_empty() { None } else { Some(t) };
        self
    }
}

/// Ordered, append-only message sequence for one session.
///
/// This is the persistence log: it holds every role. The outbound/API log
/// is not stored separately but derived by [`MessageLog::outbound`], which
/// makes `outbound ⊆ persistence` hold by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn by_role(&self, role: Role) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.role == role)
    }

    pub fn first_user_message(&self) -> Option<&Message> {
        self.by_role(Role::User).next()
    }

    /// The API-compatible subset, in order: exactly what the next request
    /// to the inference API carries.
    pub fn outbound(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.role.is_api_compatible())
            .cloned()
            .collect()
    }

    /// Drop the transient rendering flags. Called after a snapshot write so
    /// that a reload round-trips to an identical log.
    pub fn clear_extra_info(&mut self) {
        for m in &mut self.messages {
            m.include_extra_info = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_compatible_roles() {
        assert!(Role::System.is_api_compatible());
        assert!(Role::User.is_api_compatible());
        assert!(Role::Assistant.is_api_compatible());
        assert!(Role::Tool.is_api_compatible());
        assert!(!Role::Ui.is_api_compatible());
        assert!(!Role::UiWarning.is_api_compatible());
        assert!(!Role::ThinkStream.is_api_compatible());
        assert!(!Role::ContentStream.is_api_compatible());
        assert!(!Role::EndStream.is_api_compatible());
        assert!(!Role::UserSent.is_api_compatible());
    }

    #[test]
    fn outbound_is_filtered_subset_in_order() {
        let mut log = MessageLog::new();
        log.push(Message::user("hello"));
        log.push(Message::ui("executing tool read_file"));
        log.push(Message::assistant("hi"));
        log.push(Message::ui_warning("tool reported an error"));
        log.push(Message::tool_reply("call-1", "read_file", "contents"));

        let outbound = log.outbound();
        assert_eq!(outbound.len(), 3);
        assert_eq!(outbound[0].role, Role::User);
        assert_eq!(outbound[1].role, Role::Assistant);
        assert_eq!(outbound[2].role, Role::Tool);
        assert_eq!(outbound[2].tool_call_id.as_deref(), Some("call-1"));

        // Every outbound entry is present in the persistence log.
        for msg in &outbound {
            assert!(log.messages().contains(msg));
        }
    }

    #[test]
    fn extra_info_flag_is_not_serialized() {
        let mut msg = Message::assistant("answer");
        msg.include_extra_info = true;
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(!back.include_extra_info);
        assert_eq!(back.content, "answer");
    }

    #[test]
    fn role_serializes_kebab_case() {
        let json = serde_json::to_string(&Role::UiWarning).unwrap();
        assert_eq!(json, "\"ui-warning\"");
        let json = serde_json::to_string(&Role::ThinkStream).unwrap();
        assert_eq!(json, "\"think-stream\"");
    }
}
