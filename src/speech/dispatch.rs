//! Synthesis dispatcher: a FIFO of speech blocks with at most one job in flight.
//!
//! Blocks are queued in the order they were tagged. When nothing is in
//! flight the head of the queue is started on its own task; when that task
//! finishes it reports back through [`SynthesisDispatcher::on_job_complete`],
//! which frees the slot and starts the next block. A failed job is logged
//! and skipped; nothing is retried. Synthesis failures leave the block
//! unvoiced, while a clip the sink could not store or queue is counted as
//! dropped.
//!
//! A block equal to the one dispatched just before it is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{FailureScope, Result};
use crate::speech::synth::{SpeechSynthesizer, SynthesisJob};

/// Receives audio for a finished job (persist, then queue for playback).
#[async_trait]
pub trait ClipSink: Send + Sync {
    /// Take ownership of the audio synthesized for `job`.
    ///
    /// # Errors
    ///
    /// Any error is logged by the dispatcher; the queue still advances.
    async fn deliver(&self, job: &SynthesisJob, audio: Bytes) -> Result<()>;
}

/// Result of one job, reported back to the dispatcher.
#[derive(Debug)]
pub struct JobOutcome {
    /// The job that ran.
    pub job: SynthesisJob,
    /// Synthesis and delivery result.
    pub result: Result<()>,
}

#[derive(Debug, Default)]
struct DispatchState {
    pending: VecDeque<String>,
    in_flight: Option<String>,
    last_dispatched: Option<String>,
    completed: u64,
    failed: u64,
    dropped: u64,
}

impl DispatchState {
    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}

struct Inner {
    state: Mutex<DispatchState>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn ClipSink>,
    voice_id: String,
    provider: String,
    idle_tx: watch::Sender<bool>,
}

/// Handle to a conversation's synthesis queue. Cheap to clone.
#[derive(Clone)]
pub struct SynthesisDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SynthesisDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisDispatcher")
            .field("voice_id", &self.inner.voice_id)
            .field("provider", &self.inner.provider)
            .finish_non_exhaustive()
    }
}

/// Counters for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Blocks waiting to start.
    pub pending: usize,
    /// Whether a job is running.
    pub in_flight: bool,
    /// Jobs that finished successfully.
    pub completed: u64,
    /// Jobs whose synthesis failed.
    pub failed: u64,
    /// Clips synthesized but not stored or queued.
    pub dropped: u64,
}

impl SynthesisDispatcher {
    /// Create a dispatcher that voices every block with `voice_id` via `provider`.
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn ClipSink>,
        voice_id: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DispatchState::default()),
                synthesizer,
                sink,
                voice_id: voice_id.into(),
                provider: provider.into(),
                idle_tx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_idle(&self, state: &DispatchState) {
        self.inner.idle_tx.send_replace(state.is_idle());
    }

    /// Queue `blocks` in order and start the head if nothing is in flight.
    ///
    /// Blank blocks are ignored. Must be called from within a Tokio runtime.
    pub fn enqueue<I, S>(&self, blocks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut state = self.lock();
            for block in blocks {
                let block = block.as_ref().trim();
                if !block.is_empty() {
                    state.pending.push_back(block.to_owned());
                }
            }
            self.publish_idle(&state);
        }
        self.start_next();
    }

    /// Forget queued blocks and the duplicate-detection memory.
    ///
    /// A job already in flight runs to completion and delivers its clip.
    pub fn reset(&self) {
        let mut state = self.lock();
        if !state.pending.is_empty() {
            debug!(dropped = state.pending.len(), "dropping queued speech blocks");
        }
        state.pending.clear();
        state.last_dispatched = None;
        self.publish_idle(&state);
    }

    /// Free the in-flight slot and start the next block.
    pub fn on_job_complete(&self, outcome: JobOutcome) {
        {
            let mut state = self.lock();
            state.in_flight = None;
            match &outcome.result {
                Ok(()) => state.completed += 1,
                Err(e) if e.scope() == FailureScope::Silent => {
                    state.dropped += 1;
                    warn!(block = %outcome.job.text, error = %e, "speech clip dropped");
                }
                Err(e) => {
                    state.failed += 1;
                    warn!(block = %outcome.job.text, error = %e, "speech block not voiced");
                }
            }
            self.publish_idle(&state);
        }
        self.start_next();
    }

    fn start_next(&self) {
        let job = {
            let mut state = self.lock();
            if state.in_flight.is_some() {
                return;
            }
            let next = loop {
                let Some(block) = state.pending.pop_front() else {
                    break None;
                };
                if state.last_dispatched.as_deref() == Some(block.as_str()) {
                    debug!(block = %block, "skipping repeated speech block");
                    continue;
                }
                break Some(block);
            };
            let Some(text) = next else {
                self.publish_idle(&state);
                return;
            };
            state.in_flight = Some(text.clone());
            state.last_dispatched = Some(text.clone());
            self.publish_idle(&state);
            SynthesisJob::new(text, self.inner.voice_id.clone(), self.inner.provider.clone())
        };

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let result = dispatcher.run_job(&job).await;
            dispatcher.on_job_complete(JobOutcome { job, result });
        });
    }

    async fn run_job(&self, job: &SynthesisJob) -> Result<()> {
        debug!(block = %job.text, "synthesizing speech block");
        let audio = self.inner.synthesizer.synthesize(job).await?;
        self.inner.sink.deliver(job, audio).await
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Wait until nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle_tx.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Snapshot of queue counters.
    pub fn stats(&self) -> DispatchStats {
        let state = self.lock();
        DispatchStats {
            pending: state.pending.len(),
            in_flight: state.in_flight.is_some(),
            completed: state.completed,
            failed: state.failed,
            dropped: state.dropped,
        }
    }
}
