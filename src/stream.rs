use crate::message::Message;
use crate::tools::ToolCall;

/// One unit of streamed model output. A chunk carries either thinking text
/// or content text, never both; the terminal chunk has `done == true` and
/// may carry no text at all.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub text: String,
    pub is_thinking: bool,
    pub done: bool,
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Chunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_thinking: true,
            ..Default::default()
        }
    }

    /// A content-empty completion marker.
    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    pub fn done_with_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            done: true,
            tool_calls: Some(tool_calls),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Done,
}

/// What a single applied chunk changed, so the owner can relay it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// New thinking text was appended.
    Thinking(String),
    /// New content text was appended.
    Content(String),
    /// The response is complete; tool calls may be pending. Returned only
    /// when the terminal chunk carried no text of its own.
    Finished { has_tool_calls: bool },
    /// Chunk arrived after completion and was ignored.
    Ignored,
}

/// Merges an incoming chunk sequence into one growing assistant message,
/// keeping thinking and content in separate buffers of the same logical
/// message. `idle -> streaming` on the first chunk, `streaming -> done`
/// on `done == true` regardless of whether that chunk carried text.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    thinking: String,
    tool_calls: Vec<ToolCall>,
    started: bool,
    finished: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StreamState {
        if self.finished {
            StreamState::Done
        } else if self.started {
            StreamState::Streaming
        } else {
            StreamState::Idle
        }
    }

    /// Apply one chunk in receipt order.
    pub fn apply(&mut self, chunk: Chunk) -> StreamUpdate {
        if self.finished {
            tracing::warn!("Chunk received after done marker, ignoring");
            return StreamUpdate::Ignored;
        }
        self.started = true;

        if let Some(calls) = chunk.tool_calls {
            self.tool_calls.extend(calls);
        }

        let update = if chunk.text.is_empty() {
            None
        } else if chunk.is_thinking {
            self.thinking.push_str(&chunk.text);
            Some(StreamUpdate::Thinking(chunk.text))
        } else {
            self.content.push_str(&chunk.text);
            Some(StreamUpdate::Content(chunk.text))
        };

        if chunk.done {
            self.finished = true;
            // A terminal chunk may still carry text; surface that delta so
            // it is relayed or counted like any other. Completion is
            // observable through `state()` either way.
            return update.unwrap_or(StreamUpdate::Finished {
                has_tool_calls: !self.tool_calls.is_empty(),
            });
        }

        update.unwrap_or(StreamUpdate::Ignored)
    }

    /// Take the completed assistant message and pending tool calls,
    /// resetting the accumulator to idle for the next response.
    pub fn finish(&mut self) -> (Message, Vec<ToolCall>) {
        let message = Message::assistant(std::mem::take(&mut self.content))
            .with_thinking(std::mem::take(&mut self.thinking));
        let calls = std::mem::take(&mut self.tool_calls);
        self.started = false;
        self.finished = false;
        (message, calls)
    }

    /// Discard partial state after a cancellation, returning whatever
    /// message existed at that point if it had any text.
    pub fn take_partial(&mut self) -> Option<Message> {
        if !self.started {
            return None;
        }
        let (message, _) = self.finish();
        if message.content.is_empty() && message.thinking.is_none() {
            None
        } else {
            Some(message)
        }
    }
}
