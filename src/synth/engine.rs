//! Synthesis engine boundary: trait, wire messages and the worker task.
//!
//! The engine proper ([`Synthesizer`]) never runs on the caller's control
//! flow.  [`spawn_engine`] moves it into its own tokio task reached only via
//! message passing — [`EngineRequest`] in, [`EngineResponse`] out — so no
//! shared mutable state crosses the boundary except message payloads.
//!
//! Responses deliberately carry no correlation id: the synthesis channel
//! keeps at most one request unresolved at a time, so the next response of
//! the matching variant *is* the answer.  If concurrent requests are ever
//! needed, switch to explicit id correlation first.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::playback::AudioChunk;

// ---------------------------------------------------------------------------
// SynthesisError
// ---------------------------------------------------------------------------

/// All errors that can arise from the synthesis subsystem.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthesisError {
    /// `generate`/`speak` was called before a successful `initialize`.
    #[error("synthesis channel is not initialized")]
    NotInitialized,

    /// The engine reported a failure for this request.
    #[error("synthesis engine failed: {0}")]
    Engine(String),

    /// HTTP transport or connection error (remote engines).
    #[error("synthesis request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("synthesis request timed out")]
    Timeout,

    /// `stop()` discarded the result of this in-flight request.
    #[error("synthesis cancelled")]
    Cancelled,

    /// The engine worker task is gone.
    #[error("synthesis worker unavailable")]
    WorkerGone,
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// SynthesisRequest and wire messages
// ---------------------------------------------------------------------------

/// One unit of text handed to the engine for audio generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Monotonic id, used for logging only — response correlation relies on
    /// the single-slot invariant, not on this id.
    pub id: u64,
    /// Text to synthesize.
    pub text: String,
    /// Voice identifier understood by the engine.
    pub voice_id: String,
}

/// Messages sent *to* the engine worker.
#[derive(Debug)]
pub enum EngineRequest {
    /// One-time model initialisation; answered by `Ready` or `Error`.
    Init { model_id: String },
    /// Fire-and-forget warm-up; no response.
    Warm,
    /// Synthesize one utterance; answered by `Audio` or `Error`.
    Generate(SynthesisRequest),
}

/// Messages sent *from* the engine worker.
#[derive(Debug)]
pub enum EngineResponse {
    /// Initialisation completed.
    Ready,
    /// Generated audio for the outstanding `Generate` request.
    Audio(AudioChunk),
    /// The outstanding request failed.
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Synthesizer trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for speech-synthesis engines.
///
/// Implementations run inside the worker task spawned by [`spawn_engine`];
/// blocking engines should offload to `tokio::task::spawn_blocking`
/// internally.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Load or connect the model named by `model_id`.
    async fn prepare(&self, model_id: &str) -> Result<(), SynthesisError>;

    /// Best-effort warm-up (prime caches, JIT the fast path).  Failures are
    /// the implementation's to log; the caller never observes them.
    async fn warm_up(&self) {}

    /// Generate audio for `text` in the given voice.
    async fn synthesize(&self, text: &str, voice_id: &str)
        -> Result<AudioChunk, SynthesisError>;
}

// Compile-time assertion: Arc<dyn Synthesizer> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: std::sync::Arc<dyn Synthesizer>) {}
};

// ---------------------------------------------------------------------------
// Engine worker
// ---------------------------------------------------------------------------

/// Spawn the engine worker task and return its message endpoints.
///
/// The worker processes requests strictly in arrival order and exits when
/// the request channel closes or the response receiver is dropped.
pub(crate) fn spawn_engine(
    engine: std::sync::Arc<dyn Synthesizer>,
) -> (mpsc::Sender<EngineRequest>, mpsc::Receiver<EngineResponse>) {
    let (req_tx, mut req_rx) = mpsc::channel::<EngineRequest>(4);
    let (resp_tx, resp_rx) = mpsc::channel::<EngineResponse>(4);

    tokio::spawn(async move {
        while let Some(request) = req_rx.recv().await {
            match request {
                EngineRequest::Init { model_id } => {
                    let response = match engine.prepare(&model_id).await {
                        Ok(()) => EngineResponse::Ready,
                        Err(e) => EngineResponse::Error {
                            message: e.to_string(),
                        },
                    };
                    if resp_tx.send(response).await.is_err() {
                        break;
                    }
                }
                EngineRequest::Warm => {
                    engine.warm_up().await;
                }
                EngineRequest::Generate(req) => {
                    log::debug!("synth: generating #{} ({} chars)", req.id, req.text.len());
                    let response = match engine.synthesize(&req.text, &req.voice_id).await {
                        Ok(chunk) => EngineResponse::Audio(chunk),
                        Err(e) => EngineResponse::Error {
                            message: e.to_string(),
                        },
                    };
                    if resp_tx.send(response).await.is_err() {
                        break;
                    }
                }
            }
        }
        log::debug!("synth: engine worker shutting down");
    });

    (req_tx, resp_rx)
}

// ---------------------------------------------------------------------------
// MockSynthesizer  (test-only)
// ---------------------------------------------------------------------------

/// A test double that fabricates audio without any real engine.
///
/// Each synthesized chunk holds `samples_per_char × text length` samples at
/// 24 kHz, so tests can both identify requests by chunk size and give them
/// a meaningful virtual playback duration.
#[cfg(test)]
pub struct MockSynthesizer {
    requests: std::sync::Mutex<Vec<(String, tokio::time::Instant)>>,
    prepares: std::sync::atomic::AtomicUsize,
    warms: std::sync::atomic::AtomicUsize,
    active: std::sync::atomic::AtomicUsize,
    overlapped: std::sync::atomic::AtomicBool,
    delay: std::time::Duration,
    samples_per_char: usize,
    fail_substring: Option<String>,
    fail_prepare: bool,
}

#[cfg(test)]
impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            requests: std::sync::Mutex::new(Vec::new()),
            prepares: std::sync::atomic::AtomicUsize::new(0),
            warms: std::sync::atomic::AtomicUsize::new(0),
            active: std::sync::atomic::AtomicUsize::new(0),
            overlapped: std::sync::atomic::AtomicBool::new(false),
            delay: std::time::Duration::from_millis(50),
            samples_per_char: 2_400, // 0.1 s of audio per character @ 24 kHz
            fail_substring: None,
            fail_prepare: false,
        }
    }

    /// Override the simulated generation latency.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests whose text contains `marker` fail with an engine error.
    pub fn failing_when(mut self, marker: impl Into<String>) -> Self {
        self.fail_substring = Some(marker.into());
        self
    }

    /// `prepare` always fails.
    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// Texts of all synthesize calls, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Virtual instants at which each synthesize call *started*.
    pub fn started_at(&self) -> Vec<tokio::time::Instant> {
        self.requests.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepares.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn warm_calls(&self) -> usize {
        self.warms.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// `true` if two synthesize calls ever ran concurrently — a violation of
    /// the single-slot invariant.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn prepare(&self, _model_id: &str) -> Result<(), SynthesisError> {
        self.prepares
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail_prepare {
            return Err(SynthesisError::Engine("mock prepare failure".into()));
        }
        Ok(())
    }

    async fn warm_up(&self) {
        self.warms.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice_id: &str,
    ) -> Result<AudioChunk, SynthesisError> {
        use std::sync::atomic::Ordering;

        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.requests
            .lock()
            .unwrap()
            .push((text.to_string(), tokio::time::Instant::now()));

        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(marker) = &self.fail_substring {
            if text.contains(marker.as_str()) {
                return Err(SynthesisError::Engine("mock synthesis failure".into()));
            }
        }
        Ok(AudioChunk::new(
            vec![0.0; self.samples_per_char * text.chars().count()],
            24_000,
        ))
    }
}
