//! Conversation state machine
//!
//! Consumes inbound protocol events, tracks turn, thinking, and tool state,
//! writes text into the transcript, and hands playback/session side effects
//! back to the orchestrator as [`Directive`]s.

use crate::config::DisplayPolicy;
use crate::session::protocol::{FINAL_STAGE, SPECULATIVE_STAGE};
use crate::session::{ContentType, InboundEvent, Role, StopReason, ToolResult, ToolUse};

use super::TranscriptStore;

/// Advisory "someone is about to speak" indicators
///
/// At most one side is pending at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThinkingState {
    pub waiting_for_user_transcription: bool,
    pub waiting_for_assistant_response: bool,
}

impl ThinkingState {
    fn await_user(&mut self) {
        self.waiting_for_user_transcription = true;
        self.waiting_for_assistant_response = false;
    }

    fn await_assistant(&mut self) {
        self.waiting_for_user_transcription = false;
        self.waiting_for_assistant_response = true;
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether either side is pending
    #[must_use]
    pub const fn is_thinking(&self) -> bool {
        self.waiting_for_user_transcription || self.waiting_for_assistant_response
    }
}

/// A tool invocation announced by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub tool_use_id: String,
}

/// Tool execution progress
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolExecutionState {
    pub is_executing: bool,
    pub current_tool: Option<ToolCall>,
    pub last_result: Option<serde_json::Value>,
}

/// Side effect the orchestrator must carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Queue a wire frame for playback
    Play(String),
    /// Flush playback immediately
    BargeIn,
    /// The service finished its stream; the session is ready again
    SessionReady,
    /// The service reported an error; payload is the raw JSON text
    Fault(String),
}

/// Turn, thinking, and tool state for one connection
#[derive(Debug)]
pub struct ConversationState {
    transcript: TranscriptStore,
    policy: DisplayPolicy,
    thinking: ThinkingState,
    tools: ToolExecutionState,
    current_role: Option<Role>,
    displayable: bool,
}

impl ConversationState {
    /// Create a state machine writing into `transcript`
    #[must_use]
    pub fn new(transcript: TranscriptStore, policy: DisplayPolicy) -> Self {
        Self {
            transcript,
            policy,
            thinking: ThinkingState::default(),
            tools: ToolExecutionState::default(),
            current_role: None,
            displayable: true,
        }
    }

    /// Apply one inbound event
    ///
    /// `recording` is whether the microphone is currently live.
    pub fn dispatch(&mut self, event: InboundEvent, recording: bool) -> Option<Directive> {
        match event {
            InboundEvent::ContentStart(start) => {
                self.current_role = Some(start.role);
                match (start.role, start.content_type) {
                    (Role::User, ContentType::Text) => {
                        self.thinking.waiting_for_user_transcription = false;
                    }
                    (Role::Assistant, ContentType::Text) => {
                        self.thinking.waiting_for_assistant_response = false;
                        self.displayable = self.stage_is_displayable(start.generation_stage());
                    }
                    (_, ContentType::Audio) if recording => self.thinking.await_user(),
                    _ => {}
                }
                None
            }
            InboundEvent::TextOutput(output) => {
                match output.role {
                    Role::User => {
                        self.transcript.append_text(Role::User, &output.content);
                        self.thinking.await_assistant();
                    }
                    Role::Assistant if self.displayable => {
                        self.transcript.append_text(Role::Assistant, &output.content);
                    }
                    Role::Assistant => {
                        tracing::trace!("hiding non-final assistant text");
                    }
                }
                None
            }
            InboundEvent::AudioOutput(audio) => Some(Directive::Play(audio.content)),
            InboundEvent::ContentEnd(end) => {
                if end.content_type == ContentType::Text {
                    match self.current_role {
                        Some(Role::User) => self.thinking.await_assistant(),
                        Some(Role::Assistant) => {
                            self.thinking.waiting_for_assistant_response = false;
                        }
                        None => {}
                    }
                }
                match end.stop_reason {
                    Some(StopReason::EndTurn) => {
                        self.transcript.end_turn();
                        None
                    }
                    Some(StopReason::Interrupted) => Some(Directive::BargeIn),
                    Some(StopReason::PartialTurn) | None => None,
                    Some(StopReason::Other(reason)) => {
                        tracing::debug!(reason = %reason, "unhandled stop reason");
                        None
                    }
                }
            }
            InboundEvent::StreamComplete => Some(Directive::SessionReady),
            InboundEvent::ToolUse(tool) => {
                self.begin_tool(tool);
                None
            }
            InboundEvent::ToolResult(result) => {
                self.finish_tool(result);
                None
            }
            InboundEvent::Error(payload) => {
                self.thinking.clear();
                Some(Directive::Fault(payload.to_string()))
            }
            InboundEvent::Unknown(name) => {
                tracing::debug!(event = %name, "ignoring unknown event");
                None
            }
        }
    }

    /// A fatal error ended the session; drop the thinking indicators
    ///
    /// Transcript text is left as-is.
    pub fn fail(&mut self) {
        self.thinking.clear();
    }

    /// Forget all per-connection state
    pub fn reset(&mut self) {
        self.thinking.clear();
        self.tools = ToolExecutionState::default();
        self.current_role = None;
        self.displayable = true;
    }

    /// Thinking indicators
    #[must_use]
    pub const fn thinking(&self) -> ThinkingState {
        self.thinking
    }

    /// Tool execution state
    #[must_use]
    pub const fn tools(&self) -> &ToolExecutionState {
        &self.tools
    }

    /// Role most recently announced by content-start
    #[must_use]
    pub const fn current_role(&self) -> Option<Role> {
        self.current_role
    }

    /// Whether assistant text of the current turn is shown
    #[must_use]
    pub const fn is_displayable(&self) -> bool {
        self.displayable
    }

    /// Shared transcript handle
    #[must_use]
    pub const fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }

    fn stage_is_displayable(&self, stage: Option<String>) -> bool {
        match self.policy {
            DisplayPolicy::FailOpen => stage.as_deref() != Some(SPECULATIVE_STAGE),
            DisplayPolicy::FailClosed => stage.as_deref() == Some(FINAL_STAGE),
        }
    }

    fn begin_tool(&mut self, tool: ToolUse) {
        tracing::info!(tool = %tool.tool_name, id = %tool.tool_use_id, "tool execution started");
        self.tools.is_executing = true;
        self.tools.current_tool = Some(ToolCall {
            name: tool.tool_name,
            tool_use_id: tool.tool_use_id,
        });
    }

    fn finish_tool(&mut self, result: ToolResult) {
        let matches = match (&result.tool_name, &self.tools.current_tool) {
            (Some(name), Some(current)) => *name == current.name,
            _ => true,
        };

        if matches {
            tracing::info!(tool = ?result.tool_name, "tool execution finished");
            self.tools.is_executing = false;
            self.tools.current_tool = None;
        } else {
            tracing::warn!(
                tool = ?result.tool_name,
                current = ?self.tools.current_tool.as_ref().map(|t| &t.name),
                "tool result does not match the running tool"
            );
        }
        self.tools.last_result = Some(result.result);
    }
}
