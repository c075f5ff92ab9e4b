use anyhow::Result;
use async_trait::async_trait;

use crate::message::{Message, MessageLog};

/// External capability that asks a model to name a conversation. Failures
/// degrade to the configured placeholder; persistence never retries.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<String>;
}

/// Derive a title from the first user message: first non-empty line,
/// whitespace collapsed, truncated at a char boundary.
pub fn derive_title(log: &MessageLog, max_chars: usize) -> Option<String> {
    let first = log.first_user_message()?;
    let line = first.content.lines().find(|l| !l.trim().is_empty())?;
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    let title: String = collapsed.chars().take(max_chars).collect();
    Some(title)
}
