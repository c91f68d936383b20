//! The conversation loop: model call, tool execution, repeat.

use futures_util::future::join_all;
use mcpilot_types::{
    ChatMessage, ChatRequest, ToolCallRequest, ToolCallResult, ToolDefinition, ToolExecutor,
    provider::ModelProvider, strip_reasoning, truncate_str,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Maximum number of model calls in one user turn.
pub const MAX_ITERATIONS: usize = 10;

/// Longest tool output carried in a `ToolEnd` event.
const EVENT_OUTPUT_LIMIT: usize = 200;

/// Events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message for the user: model text with reasoning stripped, or a
    /// notice produced by the orchestrator itself.
    Message(ChatMessage),
    /// The model is being called.
    ThinkingStatus(String),
    /// The turn is over.
    ThinkingFinished,
    /// A tool is about to be executed.
    ToolStart { name: String, arguments: String },
    /// A tool has finished executing.
    ToolEnd {
        name: String,
        output: String,
        is_error: bool,
    },
}

/// How a call to [`Orchestrator::submit_user_message`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Completed,
    /// Another turn was already running; nothing was changed.
    Rejected,
    /// The model call failed.
    ModelFailed,
    /// The model kept requesting tools for [`MAX_ITERATIONS`] calls.
    IterationLimit,
}

/// One conversation session.
///
/// Holds the history and drives the model/tool loop for each user message.
/// Only one turn runs at a time; a second submission while a turn is in
/// progress is rejected.
pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    executor: Arc<dyn ToolExecutor>,
    model: String,
    tools: Vec<ToolDefinition>,
    system_prompt: Option<String>,
    history: Mutex<Vec<ChatMessage>>,
    busy: AtomicBool,
    session_id: Uuid,
}

/// Clears the busy flag when the turn ends, however it ends.
struct TurnGuard<'a>(&'a AtomicBool);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Orchestrator {
    /// Create a session. A non-blank `system_prompt` becomes the first
    /// history message.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        executor: Arc<dyn ToolExecutor>,
        model: impl Into<String>,
        tools: Vec<ToolDefinition>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let system_prompt = Some(system_prompt.into()).filter(|p| !p.trim().is_empty());
        let history = system_prompt
            .iter()
            .map(|p| ChatMessage::system(p.clone()))
            .collect();

        Self {
            provider,
            executor,
            model: model.into(),
            tools,
            system_prompt,
            history: Mutex::new(history),
            busy: AtomicBool::new(false),
            session_id: Uuid::new_v4(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Whether a turn is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the conversation so far.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock_history().clone()
    }

    /// Drop every message except the original system prompt.
    ///
    /// Returns `false` without changing anything while a turn is running.
    pub fn clear_history(&self) -> bool {
        if self.is_busy() {
            return false;
        }
        let mut history = self.lock_history();
        history.clear();
        if let Some(prompt) = &self.system_prompt {
            history.push(ChatMessage::system(prompt.clone()));
        }
        tracing::debug!(session = %self.session_id, "History cleared");
        true
    }

    fn append(&self, message: ChatMessage) {
        self.lock_history().push(message);
    }

    /// Run one user turn to completion.
    ///
    /// `on_event` receives status updates and user-visible messages as the
    /// turn progresses. The model is called at most [`MAX_ITERATIONS`]
    /// times; failures are reported through events and the outcome, never
    /// retried here.
    pub async fn submit_user_message<F>(&self, text: &str, mut on_event: F) -> TurnOutcome
    where
        F: FnMut(SessionEvent),
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(session = %self.session_id, "Turn already in progress, rejecting message");
            return TurnOutcome::Rejected;
        }
        let _guard = TurnGuard(&self.busy);

        self.append(ChatMessage::user(text));

        for iteration in 1..=MAX_ITERATIONS {
            on_event(SessionEvent::ThinkingStatus(if iteration == 1 {
                "Thinking...".to_string()
            } else {
                format!("Thinking... (step {iteration}/{MAX_ITERATIONS})")
            }));

            let request = ChatRequest {
                model: self.model.clone(),
                messages: self.history(),
                stream: false,
                tools: self.tools.clone(),
            };

            tracing::debug!(
                session = %self.session_id,
                iteration,
                messages = request.messages.len(),
                "Calling model"
            );

            let response = match self.provider.chat(&request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(session = %self.session_id, "Model call failed: {e}");
                    on_event(SessionEvent::Message(ChatMessage::assistant(format!(
                        "Error: no response received from the model ({e})"
                    ))));
                    on_event(SessionEvent::ThinkingFinished);
                    return TurnOutcome::ModelFailed;
                }
            };

            let message = response.message;
            let tool_calls = message.tool_calls.clone();
            let visible = strip_reasoning(&message.content);
            self.append(message);

            if tool_calls.is_empty() {
                on_event(SessionEvent::Message(ChatMessage::assistant(visible)));
                on_event(SessionEvent::ThinkingFinished);
                return TurnOutcome::Completed;
            }

            if !visible.trim().is_empty() {
                on_event(SessionEvent::Message(ChatMessage::assistant(visible)));
            }

            let results = self.execute_tools(&tool_calls, &mut on_event).await;
            for (call, result) in tool_calls.iter().zip(results) {
                self.append(ChatMessage::tool(call.name(), result.output_text()));
            }
        }

        tracing::warn!(
            session = %self.session_id,
            "Turn stopped after {MAX_ITERATIONS} model calls"
        );
        on_event(SessionEvent::Message(ChatMessage::assistant(format!(
            "This request was too complex to finish in {MAX_ITERATIONS} steps. \
             Try breaking it into smaller requests."
        ))));
        on_event(SessionEvent::ThinkingFinished);
        TurnOutcome::IterationLimit
    }

    /// Run all tool calls of one model message concurrently. Results come
    /// back in request order regardless of completion order.
    async fn execute_tools<F>(
        &self,
        calls: &[ToolCallRequest],
        on_event: &mut F,
    ) -> Vec<ToolCallResult>
    where
        F: FnMut(SessionEvent),
    {
        let mut pending = Vec::with_capacity(calls.len());
        for call in calls {
            let name = call.name().to_string();
            let arguments = call.arguments();
            on_event(SessionEvent::ToolStart {
                name: name.clone(),
                arguments: arguments
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
            });
            pending.push(async move {
                match arguments {
                    Some(arguments) => {
                        tracing::debug!(session = %self.session_id, tool = %name, "Calling tool");
                        self.executor.call_tool(&name, arguments).await
                    }
                    None => {
                        tracing::warn!(session = %self.session_id, tool = %name, "Tool call has no arguments");
                        ToolCallResult::error(format!(
                            "Error: no arguments provided for tool '{name}'"
                        ))
                    }
                }
            });
        }

        let results = join_all(pending).await;

        for (call, result) in calls.iter().zip(&results) {
            on_event(SessionEvent::ToolEnd {
                name: call.name().to_string(),
                output: truncate_for_display(&result.output_text(), EVENT_OUTPUT_LIMIT),
                is_error: result.is_error,
            });
        }
        results
    }
}

fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", truncate_str(s, max_len))
    }
}
