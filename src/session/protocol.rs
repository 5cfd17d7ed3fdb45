//! Wire events exchanged with the speech-to-speech service
//!
//! Every message is a JSON object `{"event": "<name>", "data": {...}}`.
//! Events without a payload omit `data`.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Client → service events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Handshake step 1: open a prompt
    OpenPrompt,
    /// Handshake step 2: system prompt configuration
    SystemPrompt { text: String },
    /// Handshake step 3: open the audio input stream
    OpenAudioStream,
    /// One base64 PCM16-LE capture frame
    AudioInput { data: String },
    /// End of the user's utterance
    StopAudio,
}

impl OutboundEvent {
    /// Serialize to a wire message
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the event
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenPrompt => "open-prompt",
            Self::SystemPrompt { .. } => "system-prompt",
            Self::OpenAudioStream => "open-audio-stream",
            Self::AudioInput { .. } => "audio-input",
            Self::StopAudio => "stop-audio",
        }
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("USER"),
            Self::Assistant => f.write_str("ASSISTANT"),
        }
    }
}

/// Kind of content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Text,
    Audio,
    Tool,
}

/// Why a content block ended
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum StopReason {
    /// The turn is over
    EndTurn,
    /// More of the same turn follows
    PartialTurn,
    /// The user barged in
    Interrupted,
    /// Anything newer than this client
    Other(String),
}

impl From<String> for StopReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "END_TURN" => Self::EndTurn,
            "PARTIAL_TURN" => Self::PartialTurn,
            "INTERRUPTED" => Self::Interrupted,
            _ => Self::Other(value),
        }
    }
}

/// Generation stage value that marks a turn as not final
pub const SPECULATIVE_STAGE: &str = "SPECULATIVE";

/// Generation stage value that marks a turn as final
pub const FINAL_STAGE: &str = "FINAL";

/// `content-start` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub role: Role,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// JSON-encoded object, e.g. `{"generationStage":"SPECULATIVE"}`
    #[serde(default)]
    pub additional_model_fields: Option<String>,
}

impl ContentStart {
    /// The `generationStage` carried in `additionalModelFields`, if any
    ///
    /// Missing or malformed fields yield `None`.
    #[must_use]
    pub fn generation_stage(&self) -> Option<String> {
        let raw = self.additional_model_fields.as_deref()?;
        let fields: serde_json::Value = serde_json::from_str(raw).ok()?;
        fields
            .get("generationStage")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
    }
}

/// `text-output` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextOutput {
    pub role: Role,
    pub content: String,
}

/// `audio-output` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AudioOutput {
    /// Base64 PCM16-LE at the playback rate
    pub content: String,
}

/// `content-end` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEnd {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

/// `tool-use` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub tool_name: String,
    pub tool_use_id: String,
}

/// `tool-result` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub tool_name: Option<String>,
    pub result: serde_json::Value,
}

/// Service → client events
///
/// One tagged union, consumed through a single dispatch function.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ContentStart(ContentStart),
    TextOutput(TextOutput),
    AudioOutput(AudioOutput),
    ContentEnd(ContentEnd),
    StreamComplete,
    ToolUse(ToolUse),
    ToolResult(ToolResult),
    /// Remote error, payload kept verbatim
    Error(serde_json::Value),
    /// An event this client does not know; ignored
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl InboundEvent {
    /// Parse a wire message
    ///
    /// Unrecognized event names parse to [`InboundEvent::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns error if the message is not an event envelope or a known
    /// event carries a malformed payload
    pub fn from_json(text: &str) -> Result<Self> {
        let Envelope { event, data } = serde_json::from_str(text)?;

        let parsed = match event.as_str() {
            "content-start" => Self::ContentStart(serde_json::from_value(data)?),
            "text-output" => Self::TextOutput(serde_json::from_value(data)?),
            "audio-output" => Self::AudioOutput(serde_json::from_value(data)?),
            "content-end" => Self::ContentEnd(serde_json::from_value(data)?),
            "stream-complete" => Self::StreamComplete,
            "tool-use" => Self::ToolUse(serde_json::from_value(data)?),
            "tool-result" => Self::ToolResult(serde_json::from_value(data)?),
            "error" => Self::Error(data),
            _ => Self::Unknown(event),
        };

        Ok(parsed)
    }

    /// Wire name of the event
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ContentStart(_) => "content-start",
            Self::TextOutput(_) => "text-output",
            Self::AudioOutput(_) => "audio-output",
            Self::ContentEnd(_) => "content-end",
            Self::StreamComplete => "stream-complete",
            Self::ToolUse(_) => "tool-use",
            Self::ToolResult(_) => "tool-result",
            Self::Error(_) => "error",
            Self::Unknown(name) => name,
        }
    }
}
