use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use waav_session::core::transport::{WebRtcMediaDevices, WebRtcTransportFactory};
use waav_session::{
    AudioSink, ConnectionState, RecognitionEvent, RemoteTrack, SessionConfig, SessionDependencies,
    SessionError, SessionEvent, SessionResult, SpeechRecognizer, VoiceSession,
};

/// WaaV Session - Real-time voice assistant client
#[derive(Parser, Debug)]
#[command(name = "waav-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ask a single question, print the answer and exit
    #[arg(short = 'q', long = "question", value_name = "TEXT")]
    question: Option<String>,
}

/// Drains inbound audio packets; playback is out of scope for the CLI.
#[derive(Default)]
struct PacketCountingSink {
    task: Mutex<Option<JoinHandle<()>>>,
    bytes: Arc<AtomicU64>,
}

impl AudioSink for PacketCountingSink {
    fn attach(&self, mut track: RemoteTrack) {
        let Some(mut packets) = track.packets.take() else {
            return;
        };
        let bytes = self.bytes.clone();
        let track_id = track.id.clone();
        let task = tokio::spawn(async move {
            while let Some(packet) = packets.recv().await {
                bytes.fetch_add(packet.len() as u64, Ordering::Relaxed);
            }
            debug!(track_id = %track_id, "Remote audio stream ended");
        });
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    fn detach(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!(
                bytes = self.bytes.load(Ordering::Relaxed),
                "Remote audio detached"
            );
        }
    }

    fn is_attached(&self) -> bool {
        self.task.lock().is_some()
    }
}

/// Treats each stdin line as a finalized utterance.
struct LineRecognizer {
    lines: Arc<AsyncMutex<Lines<BufReader<Stdin>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    eof: Arc<AtomicBool>,
}

impl LineRecognizer {
    fn new() -> Self {
        Self {
            lines: Arc::new(AsyncMutex::new(BufReader::new(tokio::io::stdin()).lines())),
            task: Mutex::new(None),
            eof: Arc::new(AtomicBool::new(false)),
        }
    }

    fn at_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for LineRecognizer {
    async fn start(&self, events: mpsc::Sender<RecognitionEvent>) -> SessionResult<()> {
        if self.at_eof() {
            return Err(SessionError::SpeechRecognition(
                "input stream closed".to_string(),
            ));
        }
        let lines = self.lines.clone();
        let eof = self.eof.clone();
        let task = tokio::spawn(async move {
            let event = match lines.lock().await.next_line().await {
                Ok(Some(line)) => RecognitionEvent::Final(line),
                Ok(None) => {
                    eof.store(true, Ordering::SeqCst);
                    RecognitionEvent::Ended
                }
                Err(e) => RecognitionEvent::Error(e.to_string()),
            };
            let _ = events.send(event).await;
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Print streamed text until the answer to `sequence` is complete.
async fn print_answer(events: &mut broadcast::Receiver<SessionEvent>, sequence: u64) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Text(text)) if text.sequence == sequence && text.is_final => {
                println!("{}", text.content);
                return;
            }
            Ok(SessionEvent::ResponseFailed {
                sequence: failed,
                reason,
            }) if failed == sequence => {
                eprintln!("No answer: {reason}");
                return;
            }
            Ok(SessionEvent::StatusChanged { state, message })
                if matches!(state, ConnectionState::Error | ConnectionState::Disconnected) =>
            {
                eprintln!("Session {state}: {}", message.unwrap_or_default());
                return;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn ask_once(session: &VoiceSession, question: &str) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let sequence = session
        .submit_question(question)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    tokio::select! {
        _ = print_answer(&mut events, sequence) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    Ok(())
}

async fn converse(session: &VoiceSession) {
    let recognizer = LineRecognizer::new();
    let mut events = session.subscribe();
    println!("Ask a question (one per line, Ctrl-D to quit):");

    loop {
        let result = tokio::select! {
            result = session.listen(&recognizer) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return;
            }
        };

        match result {
            Ok(Some(sequence)) => {
                tokio::select! {
                    _ = print_answer(&mut events, sequence) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted");
                        return;
                    }
                }
            }
            Ok(None) if recognizer.at_eof() => return,
            Ok(None) => {}
            Err(e) => {
                eprintln!("{e}");
                if recognizer.at_eof() || !session.is_connected() {
                    return;
                }
            }
        }
        // Drop what was already printed or belongs to earlier answers
        events = events.resubscribe();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        SessionConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        SessionConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let session = VoiceSession::new(
        &config,
        SessionDependencies {
            transports: Arc::new(WebRtcTransportFactory::new()),
            media: Arc::new(WebRtcMediaDevices),
            sink: Arc::new(PacketCountingSink::default()),
        },
    )
    .map_err(|e| anyhow!(e.to_string()))?;
    info!(session_id = %session.session_id(), "Connecting to {}", config.realtime_url);

    if let Err(e) = session.try_initialize().await {
        session.disconnect().await;
        return Err(anyhow!("Failed to initialize session: {e}"));
    }

    let outcome = match cli.question {
        Some(question) => ask_once(&session, &question).await,
        None => {
            converse(&session).await;
            Ok(())
        }
    };

    session.disconnect().await;
    outcome
}
