//! Conversation orchestration and system prompt assembly for mcpilot.

mod orchestrator;
pub mod prompt;

pub use orchestrator::{MAX_ITERATIONS, Orchestrator, SessionEvent, TurnOutcome};
pub use prompt::{NO_CAPABILITIES_PROMPT, build_system_prompt};
