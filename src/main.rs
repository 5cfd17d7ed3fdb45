use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use beacon_realtime::voice::{AudioInput, CaptureEngine, CpalOutput, PlaybackEngine, codec};
use beacon_realtime::{
    ChatHistory, SessionCommand, SessionStatus, VoiceSession, VoiceSessionConfig,
    WebSocketConnector,
};

/// Beacon Realtime - push-to-talk voice conversations
#[derive(Parser)]
#[command(name = "beacon-realtime", version, about)]
struct Cli {
    /// Streaming endpoint (overrides env and config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// System prompt (overrides env and config file)
    #[arg(long, global = true)]
    system_prompt: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the assistant (default)
    Converse,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,beacon_realtime=info",
        1 => "info,beacon_realtime=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = VoiceSessionConfig::load()?;
    if let Some(endpoint) = cli.endpoint {
        config = config.with_endpoint(endpoint);
    }
    if let Some(prompt) = cli.system_prompt {
        config = config.with_system_prompt(prompt);
    }
    config.validate()?;

    match cli.command.unwrap_or(Command::Converse) {
        Command::Converse => converse(config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker(&config).await,
    }
}

/// Push-to-talk conversation loop
#[allow(clippy::future_not_send)]
async fn converse(config: VoiceSessionConfig) -> anyhow::Result<()> {
    tracing::info!(endpoint = %config.endpoint, "starting voice session");

    let capture = CaptureEngine::from_config(&config);
    let mut session = VoiceSession::new(config, Arc::new(WebSocketConnector), Box::new(capture))?;
    session.start(CpalOutput).await?;

    let printer = tokio::spawn(print_transcript(session.transcript().subscribe()));
    let monitor = tokio::spawn(log_status(session.subscribe_status()));

    let (commands_tx, commands_rx) = mpsc::channel(8);
    tokio::spawn(read_commands(commands_tx));

    println!("Press Enter to talk, Enter again to send. Type q + Enter to quit.\n");

    let result = session.run(commands_rx).await;

    printer.abort();
    monitor.abort();
    session.disconnect().await;

    result.map_err(Into::into)
}

/// Map stdin lines to session commands
async fn read_commands(commands: mpsc::Sender<SessionCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut recording = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let command = if line.trim().eq_ignore_ascii_case("q") {
            SessionCommand::Disconnect
        } else if recording {
            println!("... sent, waiting for the assistant");
            SessionCommand::StopRecording
        } else {
            println!("... listening (Enter to send)");
            SessionCommand::StartRecording
        };
        recording = command == SessionCommand::StartRecording;

        if commands.send(command).await.is_err() || command == SessionCommand::Disconnect {
            return;
        }
    }

    let _ = commands.send(SessionCommand::Disconnect).await;
}

/// Print each transcript entry as it is created or extended
async fn print_transcript(mut history: watch::Receiver<ChatHistory>) {
    let mut printed = ChatHistory::new();

    while history.changed().await.is_ok() {
        let current = history.borrow_and_update().clone();
        for (index, message) in current.iter().enumerate() {
            let seen = printed
                .get(index)
                .is_some_and(|p| p.role == message.role && p.text == message.text);
            if !seen {
                println!("{}: {}", message.role, message.text);
            }
        }
        printed = current;
    }
}

async fn log_status(mut status: watch::Receiver<SessionStatus>) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        tracing::info!(status = ?current, "session status");
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &VoiceSessionConfig, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (frames_tx, mut frames_rx) = mpsc::channel::<String>(256);
    let mut capture = CaptureEngine::from_config(config);
    capture.start(Box::new(move |frame| {
        let _ = frames_tx.try_send(frame);
    }))?;

    println!(
        "Device rate: {} Hz -> wire rate: {} Hz",
        capture.device_rate().unwrap_or_default(),
        capture.sample_rate()
    );
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        let mut frames = 0usize;
        while let Ok(frame) = frames_rx.try_recv() {
            samples.extend(codec::decode_frame(&frame)?);
            frames += 1;
        }

        let energy = codec::rms(&samples);
        let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] frames: {frames:3} | RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]",
            i + 1
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave sent through the wire codec
async fn test_speaker(config: &VoiceSessionConfig) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = PlaybackEngine::from_config(config);
    playback.initialize(CpalOutput).await?;

    let sample_rate = playback.sample_rate();
    let frequency = 440.0_f32;
    let num_samples = usize::try_from(sample_rate)? * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    for chunk in samples.chunks(config.frame_samples) {
        playback.play_audio(&codec::encode_frame(chunk))?;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while playback.queued_samples() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    playback.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
