//! Serialized clip playback through an external player process.
//!
//! [`PlaybackQueue`] owns one background task that plays clips strictly one
//! after another. Callers enqueue paths without blocking and can
//! [`drain`](PlaybackQueue::drain) to wait until every accepted clip has
//! had its playback attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::{PipelineError, Result};

/// Players tried in order when none is configured, with their leading arguments.
const KNOWN_PLAYERS: &[(&str, &[&str])] = &[
    ("afplay", &[]),
    ("paplay", &[]),
    ("aplay", &["-q"]),
    ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
];

/// Plays one clip to completion.
#[async_trait]
pub trait ClipPlayer: Send + Sync {
    /// Play the clip at `path`, returning once playback has finished.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Playback`] if the clip could not be played.
    async fn play(&self, path: &Path) -> Result<()>;
}

/// Runs a player command with the clip path as its last argument.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandPlayer {
    /// Create a player that runs `program args... <clip>`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The configured player, or the first known player found on `PATH`.
    pub fn discover(config: &AudioConfig) -> Option<Self> {
        if let Some(player) = config.player.as_deref().map(str::trim)
            && !player.is_empty()
        {
            return match which::which(player) {
                Ok(program) => Some(Self::new(program, config.player_args.clone())),
                Err(e) => {
                    warn!(player, error = %e, "configured audio player not found");
                    None
                }
            };
        }
        KNOWN_PLAYERS.iter().find_map(|(name, args)| {
            which::which(name).ok().map(|program| {
                let mut all: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
                all.extend(config.player_args.iter().cloned());
                Self::new(program, all)
            })
        })
    }

    /// Program that will be executed.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl ClipPlayer for CommandPlayer {
    async fn play(&self, path: &Path) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| {
                PipelineError::Playback(format!("spawn {}: {e}", self.program.display()))
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::Playback(format!(
                "{} exited with {status}",
                self.program.display()
            )))
        }
    }
}

/// Accepts clips and plays nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlayer;

#[async_trait]
impl ClipPlayer for NullPlayer {
    async fn play(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "no audio player; skipping clip");
        Ok(())
    }
}

/// Pick the player for `config`, falling back to [`NullPlayer`].
pub fn player_from_config(config: &AudioConfig) -> Arc<dyn ClipPlayer> {
    match CommandPlayer::discover(config) {
        Some(player) => {
            info!(player = %player.program().display(), "audio player selected");
            Arc::new(player)
        }
        None => {
            warn!("no audio player available; playback disabled");
            Arc::new(NullPlayer)
        }
    }
}

/// FIFO playback queue with a pending-clip counter.
///
/// The counter goes up once when a clip is accepted and down once when its
/// playback attempt ends, whether or not it succeeded.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    tx: mpsc::Sender<PathBuf>,
    pending: Arc<watch::Sender<usize>>,
}

impl PlaybackQueue {
    /// Start the playback task. Must be called from within a Tokio runtime.
    pub fn spawn(player: Arc<dyn ClipPlayer>, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        tokio::spawn(run_playback_loop(rx, player, Arc::clone(&pending)));
        Self { tx, pending }
    }

    /// Queue `path` for playback without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::QueueFull`] when the queue is at capacity and
    /// [`PipelineError::Channel`] if the playback task has stopped. A rejected
    /// clip is not counted as pending.
    pub fn enqueue(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.pending.send_modify(|n| *n += 1);
        match self.tx.try_send(path.into()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        Err(PipelineError::QueueFull("audio queue full".into()))
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        Err(PipelineError::Channel("playback task stopped".into()))
                    }
                }
            }
        }
    }

    /// Clips accepted but not yet finished.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until every accepted clip has finished its playback attempt.
    pub async fn drain(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

async fn run_playback_loop(
    mut rx: mpsc::Receiver<PathBuf>,
    player: Arc<dyn ClipPlayer>,
    pending: Arc<watch::Sender<usize>>,
) {
    while let Some(path) = rx.recv().await {
        debug!(path = %path.display(), "playing clip");
        if let Err(e) = player.play(&path).await {
            warn!(path = %path.display(), error = %e, "clip playback failed");
        }
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
    debug!("playback loop stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Records played paths; paths containing `bad` fail.
    #[derive(Default)]
    struct RecordingPlayer {
        played: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ClipPlayer for RecordingPlayer {
        async fn play(&self, path: &Path) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.played.lock().unwrap().push(path.to_path_buf());
            if path.to_string_lossy().contains("bad") {
                return Err(PipelineError::Playback("decoder error".into()));
            }
            Ok(())
        }
    }

    /// Blocks each clip until a permit is added.
    struct GatedPlayer {
        gate: Semaphore,
        started: mpsc::UnboundedSender<PathBuf>,
    }

    #[async_trait]
    impl ClipPlayer for GatedPlayer {
        async fn play(&self, path: &Path) -> Result<()> {
            let _ = self.started.send(path.to_path_buf());
            self.gate.acquire().await.unwrap().forget();
            Ok(())
        }
    }

    async fn drain_with_timeout(queue: &PlaybackQueue) {
        tokio::time::timeout(Duration::from_secs(5), queue.drain())
            .await
            .expect("drain did not finish");
    }

    #[tokio::test]
    async fn plays_in_order_and_drains_to_zero_despite_failures() {
        let player = Arc::new(RecordingPlayer::default());
        let queue = PlaybackQueue::spawn(player.clone(), 16);
        let paths: Vec<PathBuf> = ["001.wav", "bad-002.wav", "003.wav", "bad-004.wav", "005.wav"]
            .iter()
            .map(PathBuf::from)
            .collect();
        for path in &paths {
            queue.enqueue(path.clone()).unwrap();
        }
        drain_with_timeout(&queue).await;
        assert_eq!(queue.pending(), 0);
        assert_eq!(*player.played.lock().unwrap(), paths);
    }

    #[tokio::test]
    async fn drain_on_empty_queue_returns_immediately() {
        let queue = PlaybackQueue::spawn(Arc::new(NullPlayer), 4);
        drain_with_timeout(&queue).await;
    }

    #[tokio::test]
    async fn full_queue_rejects_without_leaking_count() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let player = Arc::new(GatedPlayer {
            gate: Semaphore::new(0),
            started: started_tx,
        });
        let queue = PlaybackQueue::spawn(player.clone(), 1);

        queue.enqueue("a.wav").unwrap();
        assert_eq!(started_rx.recv().await, Some(PathBuf::from("a.wav")));
        queue.enqueue("b.wav").unwrap();
        let err = queue.enqueue("c.wav").unwrap_err();
        assert!(matches!(err, PipelineError::QueueFull(_)));
        assert_eq!(queue.pending(), 2);

        player.gate.add_permits(2);
        drain_with_timeout(&queue).await;
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn null_player_keeps_bookkeeping() {
        let queue = PlaybackQueue::spawn(Arc::new(NullPlayer), 8);
        for i in 0..8 {
            queue.enqueue(format!("{i:03}.wav")).unwrap();
        }
        drain_with_timeout(&queue).await;
        assert_eq!(queue.pending(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_player_reports_exit_status() {
        let ok = CommandPlayer::new("true", Vec::new());
        assert!(ok.play(Path::new("clip.wav")).await.is_ok());

        let failing = CommandPlayer::new("false", Vec::new());
        assert!(matches!(
            failing.play(Path::new("clip.wav")).await,
            Err(PipelineError::Playback(_))
        ));
    }

    #[tokio::test]
    async fn command_player_missing_program_is_playback_error() {
        let missing = CommandPlayer::new("/nonexistent/vibecast-player", Vec::new());
        assert!(matches!(
            missing.play(Path::new("clip.wav")).await,
            Err(PipelineError::Playback(_))
        ));
    }

    #[test]
    fn missing_configured_player_is_not_discovered() {
        let config = AudioConfig {
            player: Some("definitely-not-a-real-player-binary".into()),
            ..AudioConfig::default()
        };
        assert!(CommandPlayer::discover(&config).is_none());
    }
}
