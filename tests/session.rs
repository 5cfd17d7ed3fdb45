//! Voice session integration tests
//!
//! Drives a full session against an in-memory service; no audio hardware
//! or network is required.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use beacon_realtime::session::{ConnectionStatus, InboundEvent, OutboundEvent, Role};
use beacon_realtime::voice::{NullOutput, PlaybackStatus, codec};
use beacon_realtime::{ChatMessage, Error, SessionCommand, SessionStatus, VoiceSession};

mod common;

use common::{FailingOutput, MemoryConnector, ScriptedInput, test_config};

const HANDSHAKE: [&str; 3] = ["open-prompt", "system-prompt", "open-audio-stream"];

fn event(value: Value) -> InboundEvent {
    InboundEvent::from_json(&value.to_string()).unwrap()
}

fn frame() -> String {
    codec::encode_frame(&[0.25; 512])
}

fn assistant_start(stage: &str) -> Value {
    json!({
        "event": "content-start",
        "data": {
            "role": "ASSISTANT",
            "type": "TEXT",
            "additionalModelFields": format!(r#"{{"generationStage":"{stage}"}}"#),
        }
    })
}

fn text(role: &str, content: &str) -> Value {
    json!({"event": "text-output", "data": {"role": role, "content": content}})
}

fn content_end(content_type: &str, reason: &str) -> Value {
    json!({"event": "content-end", "data": {"type": content_type, "stopReason": reason}})
}

fn audio(samples: usize) -> Value {
    json!({"event": "audio-output", "data": {"content": codec::encode_frame(&vec![0.1; samples])}})
}

fn new_session(connector: &std::sync::Arc<MemoryConnector>, input: &ScriptedInput) -> VoiceSession {
    VoiceSession::new(test_config(), connector.clone(), Box::new(input.clone())).unwrap()
}

#[tokio::test]
async fn test_start_sends_handshake_in_order() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());

    session.start(NullOutput).await.unwrap();

    assert_eq!(connector.sent_names(), HANDSHAKE);
    assert_eq!(
        connector.sent()[1],
        OutboundEvent::SystemPrompt {
            text: test_config().system_prompt
        }
    );
    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(session.client().status(), ConnectionStatus::Connected);
    assert_eq!(session.playback().status(), PlaybackStatus::Ready);
}

#[tokio::test]
async fn test_recording_before_ready_emits_nothing_until_handshake() {
    let connector = MemoryConnector::new();
    let input = ScriptedInput::default();
    let mut session = new_session(&connector, &input);

    session.start_recording().unwrap();
    assert!(input.emit(frame()));
    assert_eq!(session.flush_frames().await.unwrap(), 0);

    session.start(NullOutput).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Recording);
    assert_eq!(connector.sent_names(), HANDSHAKE);

    assert!(input.emit(frame()));
    assert_eq!(session.flush_frames().await.unwrap(), 1);

    let names = connector.sent_names();
    assert_eq!(&names[..3], HANDSHAKE);
    assert_eq!(names[3], "audio-input");
}

#[tokio::test]
async fn test_stop_recording_flushes_frames_before_stop_audio() {
    let connector = MemoryConnector::new();
    let input = ScriptedInput::default();
    let mut session = new_session(&connector, &input);
    session.start(NullOutput).await.unwrap();

    session.start_recording().unwrap();
    input.emit(frame());
    input.emit(frame());
    session.stop_recording().await.unwrap();

    assert_eq!(
        &connector.sent_names()[3..],
        ["audio-input", "audio-input", "stop-audio"]
    );
    assert_eq!(session.status(), SessionStatus::Processing);
    assert!(!session.is_recording());

    // Capture is stopped synchronously: nothing reaches the sink afterwards
    assert!(!input.emit(frame()));
    assert_eq!(session.client().frames_sent(), 2);
}

#[tokio::test]
async fn test_hello_world_becomes_one_closed_entry() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();

    for value in [
        assistant_start("FINAL"),
        text("ASSISTANT", "Hello"),
        text("ASSISTANT", "world"),
        content_end("TEXT", "END_TURN"),
    ] {
        session.handle_event(event(value)).unwrap();
    }

    assert_eq!(
        session.transcript().snapshot(),
        vec![ChatMessage {
            role: Role::Assistant,
            text: "Hello world".to_string(),
            end_of_response: true,
        }]
    );
}

#[tokio::test]
async fn test_speculative_text_is_hidden() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();

    session.handle_event(event(assistant_start("SPECULATIVE"))).unwrap();
    session.handle_event(event(text("ASSISTANT", "maybe"))).unwrap();

    assert!(session.transcript().is_empty());
}

#[tokio::test]
async fn test_interrupted_discards_queued_audio() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();

    for _ in 0..3 {
        session.handle_event(event(audio(512))).unwrap();
    }
    assert_eq!(session.playback().queued_samples(), 1536);

    session
        .handle_event(event(content_end("AUDIO", "INTERRUPTED")))
        .unwrap();

    assert_eq!(session.playback().queued_samples(), 0);
}

#[tokio::test]
async fn test_partial_turn_keeps_audio_and_thinking() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();

    session
        .handle_event(event(json!({"event": "content-start", "data": {"role": "USER", "type": "TEXT"}})))
        .unwrap();
    session.handle_event(event(text("USER", "what's the weather"))).unwrap();
    session.handle_event(event(audio(256))).unwrap();
    session
        .handle_event(event(content_end("AUDIO", "PARTIAL_TURN")))
        .unwrap();

    assert_eq!(session.playback().queued_samples(), 256);
    assert!(session.thinking().waiting_for_assistant_response);
    assert!(!session.transcript().snapshot()[0].end_of_response);
}

#[tokio::test]
async fn test_malformed_audio_is_dropped_not_fatal() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();

    session
        .handle_event(event(json!({"event": "audio-output", "data": {"content": "not base64!"}})))
        .unwrap();

    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(session.playback().queued_samples(), 0);
}

#[tokio::test]
async fn test_tool_use_and_result() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();

    session
        .handle_event(event(json!({
            "event": "tool-use",
            "data": {"toolName": "getWeather", "toolUseId": "t-1"}
        })))
        .unwrap();
    assert!(session.tools().is_executing);
    assert_eq!(session.tools().current_tool.as_ref().unwrap().name, "getWeather");

    session
        .handle_event(event(json!({
            "event": "tool-result",
            "data": {"toolName": "getWeather", "result": {"temp": 21}}
        })))
        .unwrap();
    assert!(!session.tools().is_executing);
    assert!(session.tools().current_tool.is_none());
    assert_eq!(session.tools().last_result, Some(json!({"temp": 21})));
}

#[tokio::test]
async fn test_error_event_is_fatal_and_keeps_transcript() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();
    session.handle_event(event(text("USER", "hello"))).unwrap();

    let result = session.handle_event(event(json!({
        "event": "error",
        "data": {"message": "model overloaded"}
    })));

    match result {
        Err(Error::Protocol(payload)) => assert!(payload.contains("model overloaded")),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(session.status(), SessionStatus::Error);
    assert!(!session.thinking().is_thinking());
    assert_eq!(session.transcript().len(), 1);
    assert_eq!(session.client().status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn test_connection_refused_sets_error_status() {
    let connector = MemoryConnector::refusing();
    let mut session = new_session(&connector, &ScriptedInput::default());

    let result = session.start(NullOutput).await;

    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(session.client().status(), ConnectionStatus::Error);
    assert!(connector.sent().is_empty());
}

#[tokio::test]
async fn test_render_failure_prevents_connect() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());

    let result = session.start(FailingOutput).await;

    assert!(matches!(result, Err(Error::RenderInit(_))));
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(session.playback().status(), PlaybackStatus::Failed);
    assert_eq!(session.client().status(), ConnectionStatus::Disconnected);
    assert!(connector.sent().is_empty());
}

#[tokio::test]
async fn test_denied_microphone_is_fatal() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::denied());
    session.start(NullOutput).await.unwrap();

    let result = session.start_recording();

    assert!(matches!(result, Err(Error::Device(_))));
    assert_eq!(session.status(), SessionStatus::Error);
    assert!(!session.is_recording());
}

#[tokio::test]
async fn test_run_loop_skips_unknown_and_malformed_events() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();

    let mut history = session.transcript().subscribe();
    let (commands_tx, commands_rx) = mpsc::channel(4);

    let script = async {
        connector.push(json!({"event": "usage-report", "data": {}})).await;
        connector.push_raw("not json".to_string()).await;
        connector.push(text("USER", "what time is it")).await;
        connector.push(assistant_start("FINAL")).await;
        connector.push(text("ASSISTANT", "noon")).await;
        connector.push(json!({"event": "stream-complete"})).await;

        history.wait_for(|h| h.len() == 2).await.unwrap();
        commands_tx.send(SessionCommand::Disconnect).await.unwrap();
    };

    let (result, ()) = tokio::join!(session.run(commands_rx), script);

    result.unwrap();
    assert_eq!(session.status(), SessionStatus::Ready);
    let entries: Vec<(Role, String)> = session
        .transcript()
        .snapshot()
        .into_iter()
        .map(|m| (m.role, m.text))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Role::User, "what time is it".to_string()),
            (Role::Assistant, "noon".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_run_loop_forwards_capture_frames() {
    let connector = MemoryConnector::new();
    let input = ScriptedInput::default();
    let mut session = new_session(&connector, &input);
    session.start(NullOutput).await.unwrap();

    let mut status = session.subscribe_status();
    let (commands_tx, commands_rx) = mpsc::channel(4);

    let script = async {
        commands_tx.send(SessionCommand::StartRecording).await.unwrap();
        status
            .wait_for(|s| *s == SessionStatus::Recording)
            .await
            .unwrap();
        input.emit(frame());
        input.emit(frame());
        commands_tx.send(SessionCommand::StopRecording).await.unwrap();
        status
            .wait_for(|s| *s == SessionStatus::Processing)
            .await
            .unwrap();
        commands_tx.send(SessionCommand::Disconnect).await.unwrap();
    };

    let (result, ()) = tokio::join!(session.run(commands_rx), script);

    result.unwrap();
    assert_eq!(
        &connector.sent_names()[3..],
        ["audio-input", "audio-input", "stop-audio"]
    );
}

#[tokio::test]
async fn test_remote_hang_up_is_transport_error() {
    let connector = MemoryConnector::new();
    let mut session = new_session(&connector, &ScriptedInput::default());
    session.start(NullOutput).await.unwrap();
    session.handle_event(event(text("USER", "hi"))).unwrap();

    let (_commands_tx, commands_rx) = mpsc::channel(4);
    connector.hang_up();

    let result = session.run(commands_rx).await;

    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(session.transcript().len(), 1);
}

#[tokio::test]
async fn test_disconnect_tears_everything_down() {
    let connector = MemoryConnector::new();
    let input = ScriptedInput::default();
    let mut session = new_session(&connector, &input);
    session.start(NullOutput).await.unwrap();
    session.start_recording().unwrap();
    session.handle_event(event(text("USER", "bye"))).unwrap();

    session.disconnect().await;

    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert_eq!(session.client().status(), ConnectionStatus::Disconnected);
    assert_eq!(session.playback().status(), PlaybackStatus::Stopped);
    assert!(session.transcript().is_empty());
    assert!(!session.thinking().is_thinking());
    assert!(!session.is_recording());
    assert!(!input.emit(frame()));
}
