//! Conversation tracking
//!
//! The state machine turns inbound protocol events into thinking/tool state
//! and transcript updates; the transcript store holds the merged history.

mod state;
mod transcript;

pub use state::{ConversationState, Directive, ThinkingState, ToolCall, ToolExecutionState};
pub use transcript::{ChatHistory, ChatMessage, TranscriptStore};
