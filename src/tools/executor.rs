use tokio::sync::mpsc;

use crate::connection::CancelToken;
use crate::events::SessionEvent;
use crate::message::{Message, Role};
use crate::tools::{PermissionGate, ToolCall, ToolRegistry};

/// Error marker prefix for tool reply bodies. Content starting with this is
/// still a protocol-level success but gets surfaced as a UI warning.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Runs one completed assistant turn's tool calls under the permission
/// gate. Produces exactly one tool reply per input call, in input order;
/// a single failing call never terminates the batch.
pub struct ToolExecutor<'a> {
    registry: &'a ToolRegistry,
    gate: &'a dyn PermissionGate,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry, gate: &'a dyn PermissionGate) -> Self {
        Self { registry, gate }
    }

    /// Execute the batch. The returned transcript holds UI notices
    /// interleaved with the tool replies; the `Role::Tool` subset is the
    /// reply list, same order as `calls`. Cancellation stops execution of
    /// the remaining calls.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        cancel: &CancelToken,
        events: Option<&mpsc::UnboundedSender<SessionEvent>>,
    ) -> Vec<Message> {
        let mut transcript = Vec::new();

        for call in calls {
            if cancel.is_cancelled() {
                tracing::info!("Tool batch cancelled, {} call(s) skipped", calls.len());
                break;
            }

            let tool = match self.registry.get(&call.name) {
                Some(tool) => tool.clone(),
                None => {
                    let available = self.registry.names().join(", ");
                    let notice = format!(
                        "Unknown tool '{}'. Available tools: {}",
                        call.name, available
                    );
                    tracing::warn!("{}", notice);
                    emit(events, SessionEvent::Diagnostic(notice.clone()));
                    transcript.push(Message::ui_warning(notice));
                    transcript.push(Message::tool_reply(
                        &call.id,
                        &call.name,
                        format!("{ERROR_PREFIX} invalid tool '{}'", call.name),
                    ));
                    continue;
                }
            };

            let notice = format!("Executing tool {}", call.name);
            emit(
                events,
                SessionEvent::ToolStarted {
                    name: call.name.clone(),
                },
            );
            transcript.push(Message::ui(notice));

            if let Some(request) = tool.permission_request(&call.arguments) {
                let granted = self
                    .gate
                    .request(&request.question, &request.target, &request.operation)
                    .await;
                if !granted {
                    tracing::info!(
                        "Permission denied for tool {} on {}",
                        call.name,
                        request.target
                    );
                    emit(
                        events,
                        SessionEvent::ToolFinished {
                            name: call.name.clone(),
                            success: false,
                        },
                    );
                    transcript.push(Message::tool_reply(
                        &call.id,
                        &call.name,
                        format!("{ERROR_PREFIX} Permission denied: {}", request.question),
                    ));
                    continue;
                }
            }

            match tool.execute(call.arguments.clone()).await {
                Ok(content) => {
                    // An error-marker body is a success at the protocol
                    // layer; the UI still gets told.
                    if content.starts_with(ERROR_PREFIX) {
                        let warning = format!("Tool {} reported: {}", call.name, content);
                        emit(events, SessionEvent::Diagnostic(warning.clone()));
                        transcript.push(Message::ui_warning(warning));
                    }
                    emit(
                        events,
                        SessionEvent::ToolFinished {
                            name: call.name.clone(),
                            success: true,
                        },
                    );
                    transcript.push(Message::tool_reply(&call.id, &call.name, content));
                }
                Err(e) => {
                    tracing::warn!("Tool {} failed: {:#}", call.name, e);
                    emit(
                        events,
                        SessionEvent::ToolFinished {
                            name: call.name.clone(),
                            success: false,
                        },
                    );
                    transcript.push(Message::tool_reply(
                        &call.id,
                        &call.name,
                        format!("{ERROR_PREFIX} {e:#}"),
                    ));
                }
            }
        }

        transcript
    }
}

fn emit(events: Option<&mpsc::UnboundedSender<SessionEvent>>, event: SessionEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// The tool replies within a transcript, in execution order.
pub fn replies(transcript: &[Message]) -> Vec<&Message> {
    transcript
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect()
}
