//! Audio output device abstraction.
//!
//! [`AudioSink`] is the object-safe boundary between the playback queue and
//! the physical output device.  [`RodioSink`] is the production
//! implementation; it owns a `rodio::OutputStream` on a dedicated OS thread
//! because the stream handle is not `Send`.
//!
//! [`MockSink`] (available under `#[cfg(test)]`) records render order and
//! overlap so queue tests can assert the single-slot invariant without
//! touching real hardware.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::queue::PlaybackError;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A block of decoded mono PCM audio.
///
/// Produced by the synthesis engine, owned briefly by the playback queue and
/// released when rendering ends.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono `f32` PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a chunk from raw samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Returns `true` when the chunk holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// AudioSink trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface to the audio output device.
///
/// The playback queue is the only caller; it guarantees at most one `render`
/// in flight at a time.  Implementations therefore never need to mix.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Render `chunk` to completion.
    ///
    /// The future resolves when the last sample has sounded (or the device
    /// failed).  The queue may drop this future early when playback is
    /// stopped; implementations must tolerate that and [`halt`](Self::halt)
    /// is then used to silence the device.
    async fn render(&self, chunk: AudioChunk) -> Result<(), PlaybackError>;

    /// Immediately silence any active render.  Best-effort; idempotent.
    fn halt(&self);
}

// Compile-time assertion: Arc<dyn AudioSink> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Arc<dyn AudioSink>) {}
};

// ---------------------------------------------------------------------------
// RodioSink
// ---------------------------------------------------------------------------

/// Production sink backed by `rodio` on a dedicated `audio-output` thread.
///
/// `rodio::OutputStream` is not `Send`, so the stream is created and kept
/// alive on its own OS thread; render requests reach it over a channel.  The
/// active `rodio::Sink` is shared so [`halt`](AudioSink::halt) can stop it
/// from any thread — the render thread polls the sink instead of blocking in
/// `sleep_until_end`, which would make it deaf to halts.
pub struct RodioSink {
    render_tx: std::sync::mpsc::Sender<RenderRequest>,
    active: Arc<Mutex<Option<rodio::Sink>>>,
}

struct RenderRequest {
    chunk: AudioChunk,
    done: oneshot::Sender<Result<(), PlaybackError>>,
}

impl RodioSink {
    /// Open the default output device.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Device`] when no output device is available or the
    /// render thread cannot be spawned.
    pub fn new() -> Result<Self, PlaybackError> {
        let (render_tx, render_rx) = std::sync::mpsc::channel::<RenderRequest>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), PlaybackError>>();
        let active: Arc<Mutex<Option<rodio::Sink>>> = Arc::new(Mutex::new(None));
        let active_thread = Arc::clone(&active);

        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let (stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => {
                        let _ = ready_tx.send(Ok(()));
                        pair
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::Device(e.to_string())));
                        return;
                    }
                };
                // Dropping the stream tears down the device; keep it alive for
                // the lifetime of the thread.
                let _stream = stream;

                while let Ok(RenderRequest { chunk, done }) = render_rx.recv() {
                    let result = render_on(&handle, &active_thread, chunk);
                    let _ = done.send(result);
                }
                log::debug!("playback: audio-output thread shutting down");
            })
            .map_err(|e| PlaybackError::Device(format!("spawn audio-output thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { render_tx, active }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::Device("audio-output thread died".into())),
        }
    }
}

/// Render one chunk on the output thread, polling until drained or halted.
fn render_on(
    handle: &rodio::OutputStreamHandle,
    active: &Mutex<Option<rodio::Sink>>,
    chunk: AudioChunk,
) -> Result<(), PlaybackError> {
    let sink = rodio::Sink::try_new(handle).map_err(|e| PlaybackError::Device(e.to_string()))?;
    sink.append(rodio::buffer::SamplesBuffer::new(
        1,
        chunk.sample_rate,
        chunk.samples,
    ));
    *active.lock().unwrap() = Some(sink);

    loop {
        {
            let guard = active.lock().unwrap();
            match guard.as_ref() {
                // halt() took the sink — the render was silenced
                None => return Err(PlaybackError::Interrupted),
                Some(s) if s.empty() => break,
                Some(_) => {}
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    active.lock().unwrap().take();
    Ok(())
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn render(&self, chunk: AudioChunk) -> Result<(), PlaybackError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.render_tx
            .send(RenderRequest {
                chunk,
                done: done_tx,
            })
            .map_err(|_| PlaybackError::Device("audio-output thread gone".into()))?;
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(PlaybackError::Device("audio-output thread gone".into())),
        }
    }

    fn halt(&self) {
        if let Some(sink) = self.active.lock().unwrap().take() {
            sink.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// MockSink  (test-only)
// ---------------------------------------------------------------------------

/// Test sink that "renders" by sleeping for the chunk's real duration
/// (instant under tokio's paused clock) while recording order and overlap.
#[cfg(test)]
pub struct MockSink {
    /// Sample counts of chunks whose render ran to completion, with the
    /// virtual instant at which each finished.
    finished: Mutex<Vec<(usize, tokio::time::Instant)>>,
    active: std::sync::atomic::AtomicUsize,
    overlapped: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicUsize,
    fail_calls: Vec<usize>,
}

#[cfg(test)]
impl MockSink {
    pub fn new() -> Self {
        Self::failing_on(&[])
    }

    /// Render calls whose zero-based index appears in `calls` fail with a
    /// device error.
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            finished: Mutex::new(Vec::new()),
            active: std::sync::atomic::AtomicUsize::new(0),
            overlapped: std::sync::atomic::AtomicBool::new(false),
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail_calls: calls.to_vec(),
        }
    }

    /// Sample counts of completed renders, in completion order.
    pub fn finished(&self) -> Vec<usize> {
        self.finished.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }

    /// Virtual instants at which each render completed.
    pub fn finished_at(&self) -> Vec<tokio::time::Instant> {
        self.finished.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    /// `true` if two renders were ever in flight at once.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl AudioSink for MockSink {
    async fn render(&self, chunk: AudioChunk) -> Result<(), PlaybackError> {
        use std::sync::atomic::Ordering;

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        // Decrement even when the future is dropped mid-render.
        struct Guard<'a>(&'a std::sync::atomic::AtomicUsize);
        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
        let _guard = Guard(&self.active);

        tokio::time::sleep(chunk.duration()).await;

        if self.fail_calls.contains(&call) {
            return Err(PlaybackError::Device("mock render failure".into()));
        }
        self.finished
            .lock()
            .unwrap()
            .push((chunk.samples.len(), tokio::time::Instant::now()));
        Ok(())
    }

    fn halt(&self) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_duration_matches_sample_count() {
        let chunk = AudioChunk::new(vec![0.0; 24_000], 24_000);
        assert_eq!(chunk.duration(), Duration::from_secs(1));
    }

    #[test]
    fn chunk_duration_zero_rate_is_zero() {
        let chunk = AudioChunk::new(vec![0.0; 100], 0);
        assert_eq!(chunk.duration(), Duration::ZERO);
    }

    #[test]
    fn empty_chunk_is_empty() {
        assert!(AudioChunk::new(Vec::new(), 24_000).is_empty());
        assert!(!AudioChunk::new(vec![0.1], 24_000).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mock_sink_records_completion() {
        let sink = MockSink::new();
        sink.render(AudioChunk::new(vec![0.0; 240], 24_000))
            .await
            .unwrap();
        assert_eq!(sink.finished(), vec![240]);
        assert!(!sink.overlapped());
    }

    #[tokio::test(start_paused = true)]
    async fn mock_sink_fails_on_configured_call() {
        let sink = MockSink::failing_on(&[0]);
        let err = sink
            .render(AudioChunk::new(vec![0.0; 240], 24_000))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Device(_)));
        assert!(sink.finished().is_empty());
    }
}
