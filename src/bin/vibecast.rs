//! CLI binary for vibecast.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use vibecast::VibecastConfig;
use vibecast::audio::{PlaybackQueue, player_from_config};
use vibecast::llm::{ChatClient, ChatEndpoint, ChatStreamClient, PromptLibrary};
use vibecast::pipeline::{
    ConversationEvent, ConversationProfile, ConversationSession, NoticeLevel, StoreClipSink,
    TurnOrchestrator, event_channel,
};
use vibecast::speech::{SpeechClient, SpeechPreparer, SynthesisDispatcher};
use vibecast::storage::FsConversationStore;
use vibecast::vibecast_dirs;

const QUIT_COMMAND: &str = "/quit";

/// Vibecast: host a podcast with a voiced AI guest.
#[derive(Parser)]
#[command(name = "vibecast", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "VIBECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Record an episode: type as the Host, the Guest answers out loud.
    Chat {
        /// Who the Guest is.
        #[arg(long)]
        persona: String,
        /// What the episode is about.
        #[arg(long)]
        topic: String,
        /// Synthesis voice for the Guest (defaults to `tts.default_voice`).
        #[arg(long)]
        voice: Option<String>,
        /// Resume an existing conversation instead of starting a new one.
        #[arg(long)]
        conversation_id: Option<String>,
    },

    /// Print a stored transcript.
    Transcript {
        /// Conversation to print.
        id: String,
    },

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(VibecastConfig::default_config_path);

    match cli.command {
        Command::Chat {
            persona,
            topic,
            voice,
            conversation_id,
        } => {
            let config = VibecastConfig::load_or_create(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            run_chat(config, persona, topic, voice, conversation_id).await
        }
        Command::Transcript { id } => {
            let config = load_existing(&config_path)?;
            print_transcript(&config, &id).await
        }
        Command::InitConfig { force } => init_config(&config_path, force),
    }
}

/// Stderr output filtered by `RUST_LOG`, plus a daily log file when the
/// logs directory is writable.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vibecast=info"))
    };
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let logs = vibecast_dirs::logs_dir();
    match std::fs::create_dir_all(&logs) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&logs, "vibecast.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            tracing_subscriber::registry().with(stderr).with(file).init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry().with(stderr).init();
            warn!(path = %logs.display(), error = %e, "file logging disabled");
            None
        }
    }
}

fn load_existing(path: &Path) -> anyhow::Result<VibecastConfig> {
    if path.exists() {
        Ok(VibecastConfig::from_file(path)?)
    } else {
        Ok(VibecastConfig::default())
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    VibecastConfig::default().save_to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn print_transcript(config: &VibecastConfig, id: &str) -> anyhow::Result<()> {
    let store = FsConversationStore::new(config.storage.conversations_dir());
    if !store.exists(id).await? {
        anyhow::bail!("no conversation named {id}");
    }
    print!("{}", store.read_transcript(id).await?);
    Ok(())
}

async fn run_chat(
    config: VibecastConfig,
    persona: String,
    topic: String,
    voice: Option<String>,
    conversation_id: Option<String>,
) -> anyhow::Result<()> {
    let conversation_id = conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let store = FsConversationStore::new(config.storage.conversations_dir());
    store.create_conversation(&conversation_id).await?;
    let history: Vec<_> = store
        .load_messages(&conversation_id)
        .await?
        .iter()
        .map(|entry| entry.to_line())
        .collect();
    let resumed = !history.is_empty();
    let store = Arc::new(store);

    let prompts = PromptLibrary::with_override_dir(vibecast_dirs::prompts_dir());

    let endpoint = ChatEndpoint::from_config(&config, &config.ai.conversation_provider)?;
    let streamer = ChatStreamClient::new(endpoint, &config.stream)?;

    let mut speech = SpeechClient::new(config.providers.clone(), config.tts.clone())?;
    let prep_provider = config.ai.speech_prep_provider.trim();
    if !prep_provider.is_empty() {
        let endpoint = ChatEndpoint::from_config(&config, prep_provider)?;
        let chat = ChatClient::new(endpoint, Duration::from_secs(config.tts.timeout_secs))?;
        speech = speech.with_preparer(SpeechPreparer::new(
            chat,
            prompts.clone(),
            persona.clone(),
            topic.clone(),
        ));
    }

    let playback = PlaybackQueue::spawn(player_from_config(&config.audio), config.audio.queue_size);
    let (events_tx, events_rx) = event_channel();
    let sink = StoreClipSink::new(
        conversation_id.clone(),
        store.clone(),
        playback.clone(),
        events_tx.clone(),
    );
    let voice = voice.unwrap_or_else(|| config.tts.default_voice.clone());
    let tts_provider = config.providers.resolve_tts_provider(&config.ai.tts_provider);
    let dispatcher = SynthesisDispatcher::new(Arc::new(speech), Arc::new(sink), voice, tts_provider);

    let profile = ConversationProfile {
        conversation_id: conversation_id.clone(),
        persona,
        topic,
    };
    let orchestrator = TurnOrchestrator::new(
        profile,
        Arc::new(streamer),
        dispatcher,
        store,
        events_tx.clone(),
    )
    .with_prompts(prompts)
    .with_history(history);

    let handle = ConversationSession::spawn(orchestrator, playback, events_tx);
    let printer = tokio::spawn(print_events(events_rx));

    info!(%conversation_id, resumed, "conversation ready");
    println!("Vibecast v{}", env!("CARGO_PKG_VERSION"));
    println!("Conversation {conversation_id}. Type to talk, {QUIT_COMMAND} to finish.\n");
    if !resumed {
        handle.start_guest().await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == QUIT_COMMAND => break,
                Some(line) if line.trim().is_empty() => {}
                Some(line) => handle.host_message(line.trim()).await?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    println!("\nFinishing playback...");
    handle.exit().await?;
    printer.abort();
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<ConversationEvent>) {
    let mut stdout = std::io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ConversationEvent::TurnStarted { .. } => print!("Guest: "),
            ConversationEvent::TranscriptDelta { text, .. } => print!("{text}"),
            ConversationEvent::GuestUtterance {
                text,
                fallback: true,
                ..
            } => print!("{text}"),
            ConversationEvent::TurnIdle { .. } => println!("\n"),
            ConversationEvent::Notice {
                level: NoticeLevel::Error,
                text,
            } => eprintln!("! {text}"),
            ConversationEvent::Notice {
                level: NoticeLevel::Info,
                text,
            } => eprintln!("{text}"),
            ConversationEvent::GuestUtterance { .. }
            | ConversationEvent::HostMessage { .. }
            | ConversationEvent::SpeechBlock { .. }
            | ConversationEvent::ClipQueued { .. } => {}
        }
        let _ = stdout.flush();
    }
}
