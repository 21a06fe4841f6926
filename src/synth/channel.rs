//! Request/response bridge to the synthesis engine worker.
//!
//! [`SynthesisChannel`] owns the worker endpoints behind a single
//! `tokio::sync::Mutex` — the *slot*.  Holding the slot for the full
//! request/response exchange is what enforces the one-in-flight invariant
//! and makes variant-keyed response correlation sound.  Callers queue on
//! the mutex in arrival order, so serial requests resolve in submission
//! order.
//!
//! `stop()` cannot abort a computation the engine is already executing; it
//! only discards the eventual result.  Discarded responses are counted and
//! drained before the next live request is issued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};

use crate::playback::{AudioChunk, PlaybackHandle, PlaybackQueue};

use super::engine::{
    spawn_engine, EngineRequest, EngineResponse, SynthesisError, SynthesisRequest, Synthesizer,
};

// ---------------------------------------------------------------------------
// SynthesisChannel
// ---------------------------------------------------------------------------

/// The single outstanding request slot.
struct Slot {
    req_tx: mpsc::Sender<EngineRequest>,
    resp_rx: mpsc::Receiver<EngineResponse>,
    /// Responses owed by requests whose callers gave up after `stop()`.
    /// Drained (and discarded) before the next request goes out.
    stale: u32,
}

/// Asynchronous bridge to a speech-synthesis engine running off the calling
/// control flow.
///
/// Create one per session with [`SynthesisChannel::new`]; there is no
/// process-wide instance.  Call [`initialize`](Self::initialize) once before
/// the first request.
pub struct SynthesisChannel {
    slot: Mutex<Slot>,
    /// Wakes the waiting caller on `stop()` so it can abandon its request.
    cancel: Notify,
    playback: Arc<PlaybackQueue>,
    next_id: AtomicU64,
    initialized: AtomicBool,
    warmed: AtomicBool,
}

impl SynthesisChannel {
    /// Spawn the engine worker and wrap its endpoints.
    ///
    /// `playback` receives the audio of every [`speak`](Self::speak) call;
    /// [`generate`](Self::generate) bypasses it.
    pub fn new(engine: Arc<dyn Synthesizer>, playback: Arc<PlaybackQueue>) -> Self {
        let (req_tx, resp_rx) = spawn_engine(engine);
        Self {
            slot: Mutex::new(Slot {
                req_tx,
                resp_rx,
                stale: 0,
            }),
            cancel: Notify::new(),
            playback,
            next_id: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            warmed: AtomicBool::new(false),
        }
    }

    /// Initialise the engine with `model_id`.
    ///
    /// The first successful initialisation is followed by a one-time
    /// fire-and-forget warm-up request.
    pub async fn initialize(&self, model_id: &str) -> Result<(), SynthesisError> {
        let mut slot = self.slot.lock().await;
        self.drain_stale(&mut slot).await?;

        slot.req_tx
            .send(EngineRequest::Init {
                model_id: model_id.to_string(),
            })
            .await
            .map_err(|_| SynthesisError::WorkerGone)?;

        match slot.resp_rx.recv().await {
            Some(EngineResponse::Ready) => {
                self.initialized.store(true, Ordering::SeqCst);
                if !self.warmed.swap(true, Ordering::SeqCst) {
                    log::debug!("synth: engine ready, sending warm-up");
                    let _ = slot.req_tx.send(EngineRequest::Warm).await;
                }
                Ok(())
            }
            Some(EngineResponse::Error { message }) => Err(SynthesisError::Engine(message)),
            Some(other) => Err(SynthesisError::Engine(format!(
                "unexpected response to init: {other:?}"
            ))),
            None => Err(SynthesisError::WorkerGone),
        }
    }

    /// Synthesize `text`, returning the raw audio unplayed.
    pub async fn generate(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<AudioChunk, SynthesisError> {
        let mut slot = self.slot.lock().await;
        self.run_generate(&mut slot, text, voice_id).await
    }

    /// Synthesize `text` and hand the audio to the playback queue.
    ///
    /// Returns at *generation* completion — the chunk is queued but usually
    /// still sounding — so the caller can request the next sentence while
    /// this one plays.  The returned [`PlaybackHandle`] resolves the two
    /// playback signals (`started`, `wait`) independently.
    pub async fn speak(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<PlaybackHandle, SynthesisError> {
        let chunk = {
            let mut slot = self.slot.lock().await;
            self.run_generate(&mut slot, text, voice_id).await?
        };
        Ok(self.playback.enqueue(chunk))
    }

    /// Discard the eventual result of any in-flight request.
    ///
    /// The engine computation itself cannot be interrupted; the waiting
    /// caller returns [`SynthesisError::Cancelled`] immediately and the
    /// response is thrown away when it eventually arrives.  A no-op when
    /// nothing is in flight.
    pub fn stop(&self) {
        self.cancel.notify_waiters();
    }

    /// Returns `true` after a successful [`initialize`](Self::initialize).
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn run_generate(
        &self,
        slot: &mut Slot,
        text: &str,
        voice_id: &str,
    ) -> Result<AudioChunk, SynthesisError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SynthesisError::NotInitialized);
        }
        self.drain_stale(slot).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register cancellation interest before the request goes out so a
        // stop() arriving while the engine is busy is never missed.
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);

        let Slot {
            req_tx,
            resp_rx,
            stale,
        } = slot;

        req_tx
            .send(EngineRequest::Generate(SynthesisRequest {
                id,
                text: text.to_string(),
                voice_id: voice_id.to_string(),
            }))
            .await
            .map_err(|_| SynthesisError::WorkerGone)?;

        // From here a response is owed.  The guard counts it stale unless we
        // consume it — covering both stop() and the caller's future being
        // dropped mid-wait.
        let mut owed = OwedResponse {
            stale,
            settled: false,
        };

        tokio::select! {
            response = resp_rx.recv() => {
                owed.settled = true;
                match response {
                    // No id on the wire: the slot lock guarantees this
                    // response answers the request issued above.
                    Some(EngineResponse::Audio(chunk)) => Ok(chunk),
                    Some(EngineResponse::Error { message }) => {
                        Err(SynthesisError::Engine(message))
                    }
                    Some(other) => Err(SynthesisError::Engine(format!(
                        "unexpected response to generate: {other:?}"
                    ))),
                    None => Err(SynthesisError::WorkerGone),
                }
            },
            _ = &mut cancelled => {
                log::debug!("synth: request #{id} cancelled, result will be discarded");
                Err(SynthesisError::Cancelled)
            }
        }
    }

    /// Consume responses owed by cancelled or abandoned requests.
    ///
    /// The worker is single-threaded, so a new request would queue behind
    /// the abandoned computation anyway — waiting here loses nothing.
    async fn drain_stale(&self, slot: &mut Slot) -> Result<(), SynthesisError> {
        while slot.stale > 0 {
            match slot.resp_rx.recv().await {
                Some(_) => {
                    slot.stale -= 1;
                    log::debug!("synth: discarded stale response");
                }
                None => return Err(SynthesisError::WorkerGone),
            }
        }
        Ok(())
    }
}

/// Drop-guard for a request whose response has not been consumed yet.
///
/// `settled` flips once the response is read; otherwise the drop marks one
/// stale response for the next slot holder to drain.
struct OwedResponse<'a> {
    stale: &'a mut u32,
    settled: bool,
}

impl Drop for OwedResponse<'_> {
    fn drop(&mut self) {
        if !self.settled {
            *self.stale += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::engine::MockSynthesizer;
    use super::*;
    use crate::playback::MockSink;
    use std::time::Duration;

    struct Fixture {
        channel: Arc<SynthesisChannel>,
        engine: Arc<MockSynthesizer>,
        sink: Arc<MockSink>,
    }

    async fn fixture(engine: MockSynthesizer) -> Fixture {
        let engine = Arc::new(engine);
        let sink = Arc::new(MockSink::new());
        let playback = Arc::new(PlaybackQueue::new(sink.clone()));
        let channel = Arc::new(SynthesisChannel::new(engine.clone(), playback));
        channel.initialize("test-model").await.unwrap();
        Fixture {
            channel,
            engine,
            sink,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn generate_before_initialize_errors() {
        let engine = Arc::new(MockSynthesizer::new());
        let sink: Arc<MockSink> = Arc::new(MockSink::new());
        let playback = Arc::new(PlaybackQueue::new(sink));
        let channel = SynthesisChannel::new(engine, playback);

        let err = channel.generate("hello", "alloy").await.unwrap_err();
        assert_eq!(err, SynthesisError::NotInitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_failure_surfaces_engine_error() {
        let engine = Arc::new(MockSynthesizer::new().failing_prepare());
        let sink: Arc<MockSink> = Arc::new(MockSink::new());
        let playback = Arc::new(PlaybackQueue::new(sink));
        let channel = SynthesisChannel::new(engine, playback);

        let err = channel.initialize("test-model").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Engine(_)));
        assert!(!channel.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_follows_only_first_initialize() {
        let fx = fixture(MockSynthesizer::new()).await;
        fx.channel.initialize("test-model").await.unwrap();
        fx.channel.initialize("test-model").await.unwrap();

        // Let the fire-and-forget warm request reach the worker.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.engine.prepare_calls(), 3);
        assert_eq!(fx.engine.warm_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generate_returns_audio() {
        let fx = fixture(MockSynthesizer::new()).await;
        let chunk = fx.channel.generate("hello", "alloy").await.unwrap();
        assert_eq!(chunk.samples.len(), 2_400 * 5);
        // generate() must not touch the playback queue.
        assert!(fx.sink.finished().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn serial_requests_resolve_in_submission_order() {
        let fx = fixture(MockSynthesizer::new()).await;
        fx.channel.generate("one", "alloy").await.unwrap();
        fx.channel.generate("two", "alloy").await.unwrap();
        fx.channel.generate("three", "alloy").await.unwrap();
        assert_eq!(fx.engine.texts(), vec!["one", "two", "three"]);
        assert!(!fx.engine.overlapped());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_violate_single_slot() {
        let fx = fixture(MockSynthesizer::new()).await;
        let a = {
            let ch = Arc::clone(&fx.channel);
            tokio::spawn(async move { ch.generate("aaaa", "alloy").await })
        };
        let b = {
            let ch = Arc::clone(&fx.channel);
            tokio::spawn(async move { ch.generate("bbbb", "alloy").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert!(!fx.engine.overlapped());
    }

    #[tokio::test(start_paused = true)]
    async fn speak_returns_at_generation_completion() {
        let fx = fixture(MockSynthesizer::new()).await;

        // "hello" → 0.5 s of audio; speak() must return before it finishes
        // sounding.
        let handle = fx.channel.speak("hello", "alloy").await.unwrap();
        assert!(fx.sink.finished().is_empty());

        handle.wait().await.unwrap();
        assert_eq!(fx.sink.finished(), vec![2_400 * 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failure_rejects_the_request() {
        let fx = fixture(MockSynthesizer::new().failing_when("boom")).await;
        let err = fx.channel.generate("boom", "alloy").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Engine(_)));

        // The channel keeps working afterwards.
        fx.channel.generate("fine", "alloy").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_request() {
        let fx = fixture(MockSynthesizer::new().with_delay(Duration::from_secs(5))).await;

        let pending = {
            let ch = Arc::clone(&fx.channel);
            tokio::spawn(async move { ch.generate("slow", "alloy").await })
        };
        // Let the request reach the engine, then cancel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        fx.channel.stop();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, SynthesisError::Cancelled);

        // The next request drains the stale response and succeeds.
        let chunk = fx.channel.generate("next", "alloy").await.unwrap();
        assert_eq!(chunk.samples.len(), 2_400 * 4);
        assert_eq!(fx.engine.texts(), vec!["slow", "next"]);
    }

    /// A caller aborted mid-wait (task killed, not `stop()`) must not leave
    /// its response to be mis-correlated with the next request.
    #[tokio::test(start_paused = true)]
    async fn aborted_caller_does_not_poison_correlation() {
        let fx = fixture(MockSynthesizer::new().with_delay(Duration::from_secs(2))).await;

        let doomed = {
            let ch = Arc::clone(&fx.channel);
            tokio::spawn(async move { ch.generate("doomed", "alloy").await })
        };
        // Let the request reach the engine, then kill the caller outright.
        tokio::time::sleep(Duration::from_millis(100)).await;
        doomed.abort();
        let _ = doomed.await;

        // "doomed"'s audio (6 chars) must be drained, not returned here.
        let chunk = fx.channel.generate("ok", "alloy").await.unwrap();
        assert_eq!(chunk.samples.len(), 2_400 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_with_nothing_in_flight_is_a_noop() {
        let fx = fixture(MockSynthesizer::new()).await;
        fx.channel.stop();
        fx.channel.generate("after", "alloy").await.unwrap();
        assert_eq!(fx.engine.texts(), vec!["after"]);
    }
}
