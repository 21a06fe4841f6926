//! Strict FIFO playback queue with a single render slot.
//!
//! [`PlaybackQueue`] renders decoded audio one chunk at a time, in enqueue
//! order.  A dedicated drain task owns the render slot, so overlapping
//! renders cannot occur by construction.  [`stop`](PlaybackQueue::stop)
//! halts the active render and discards everything queued behind it; the
//! handles of discarded chunks resolve to [`PlaybackError::Interrupted`].
//!
//! The queue is the sole mediator of the audio output device — nothing else
//! in the engine writes to an [`AudioSink`](super::AudioSink).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{oneshot, Notify};

use super::sink::{AudioChunk, AudioSink};

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can surface from audio playback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    /// The output device failed or is unavailable.
    #[error("audio device error: {0}")]
    Device(String),

    /// Playback was cut short — either `stop()` discarded the chunk or the
    /// engine shut down before it finished sounding.
    #[error("playback interrupted")]
    Interrupted,
}

// ---------------------------------------------------------------------------
// PlaybackHandle
// ---------------------------------------------------------------------------

/// Completion handle for one enqueued chunk.
///
/// Exposes the two playback signals independently:
/// [`started`](Self::started) resolves when the chunk begins sounding,
/// [`wait`](Self::wait) when it has finished (or failed / been discarded).
pub struct PlaybackHandle {
    started: oneshot::Receiver<()>,
    done: oneshot::Receiver<Result<(), PlaybackError>>,
}

impl PlaybackHandle {
    /// Wait until the chunk begins rendering.
    ///
    /// Returns [`PlaybackError::Interrupted`] when the chunk was discarded
    /// before it ever reached the render slot.
    pub async fn started(&mut self) -> Result<(), PlaybackError> {
        (&mut self.started)
            .await
            .map_err(|_| PlaybackError::Interrupted)
    }

    /// Wait until the chunk has finished sounding.
    pub async fn wait(self) -> Result<(), PlaybackError> {
        match self.done.await {
            Ok(result) => result,
            // The queue dropped the slot without resolving it — the chunk
            // was discarded by stop() or the queue itself went away.
            Err(_) => Err(PlaybackError::Interrupted),
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackQueue
// ---------------------------------------------------------------------------

struct QueueItem {
    chunk: AudioChunk,
    started: oneshot::Sender<()>,
    done: oneshot::Sender<Result<(), PlaybackError>>,
}

struct QueueState {
    items: VecDeque<QueueItem>,
    /// Bumped by every `stop()`; a popped item whose epoch is stale belongs
    /// to a flushed batch and is discarded without rendering.
    epoch: u64,
    rendering: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Wakes the drain task when a new item arrives.
    wake: Notify,
    /// Interrupts the active render on `stop()`.
    abort: Notify,
}

/// FIFO audio playback queue with a single render slot.
///
/// Must be created inside a tokio runtime (it spawns its drain task).
pub struct PlaybackQueue {
    shared: Arc<Shared>,
    sink: Arc<dyn AudioSink>,
    drain: tokio::task::JoinHandle<()>,
}

impl PlaybackQueue {
    /// Create a queue rendering through `sink` and spawn its drain task.
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                epoch: 0,
                rendering: false,
            }),
            wake: Notify::new(),
            abort: Notify::new(),
        });
        let drain = tokio::spawn(drain(Arc::clone(&shared), Arc::clone(&sink)));
        Self {
            shared,
            sink,
            drain,
        }
    }

    /// Append `chunk` and return its completion handle.
    ///
    /// Rendering starts immediately when the queue is idle; otherwise the
    /// chunk waits its turn behind earlier chunks.
    pub fn enqueue(&self, chunk: AudioChunk) -> PlaybackHandle {
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut st = self.shared.state.lock().unwrap();
            st.items.push_back(QueueItem {
                chunk,
                started: started_tx,
                done: done_tx,
            });
        }
        self.shared.wake.notify_one();
        PlaybackHandle {
            started: started_rx,
            done: done_rx,
        }
    }

    /// Halt the active render and discard everything queued.
    ///
    /// Handles of discarded chunks resolve to
    /// [`PlaybackError::Interrupted`].  The queue remains usable; a
    /// subsequent [`enqueue`](Self::enqueue) starts a fresh batch.
    pub fn stop(&self) {
        let discarded = {
            let mut st = self.shared.state.lock().unwrap();
            st.epoch += 1;
            std::mem::take(&mut st.items)
        };
        if !discarded.is_empty() {
            log::debug!(
                "playback: stop discarded {} queued chunk(s)",
                discarded.len()
            );
        }
        // Dropping the items drops their result senders — abandoned handles.
        drop(discarded);
        self.sink.halt();
        self.shared.abort.notify_waiters();
    }

    /// Number of chunks waiting or rendering.
    pub fn len(&self) -> usize {
        let st = self.shared.state.lock().unwrap();
        st.items.len() + usize::from(st.rendering)
    }

    /// Returns `true` when nothing is waiting or rendering.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.drain.abort();
        self.sink.halt();
    }
}

// ---------------------------------------------------------------------------
// Drain task
// ---------------------------------------------------------------------------

/// The single render slot: pops the head, renders it, resolves its handle,
/// advances.  Runs until the owning queue is dropped.
async fn drain(shared: Arc<Shared>, sink: Arc<dyn AudioSink>) {
    loop {
        // Wait for the next queued chunk.
        let (item, epoch) = loop {
            {
                let mut st = shared.state.lock().unwrap();
                if let Some(item) = st.items.pop_front() {
                    st.rendering = true;
                    break (item, st.epoch);
                }
            }
            shared.wake.notified().await;
        };

        // Register abort interest *before* re-checking the epoch so a stop()
        // racing with the pop above cannot slip through unnoticed.
        let aborted = shared.abort.notified();
        tokio::pin!(aborted);

        if shared.state.lock().unwrap().epoch != epoch {
            // A stop() flushed this batch between pop and here; abandon the
            // item without rendering.
            shared.state.lock().unwrap().rendering = false;
            continue;
        }

        let QueueItem {
            chunk,
            started,
            done,
        } = item;
        let _ = started.send(());

        let result = tokio::select! {
            r = sink.render(chunk) => r,
            _ = &mut aborted => Err(PlaybackError::Interrupted),
        };

        shared.state.lock().unwrap().rendering = false;

        match result {
            Ok(()) => {
                let _ = done.send(Ok(()));
            }
            Err(PlaybackError::Interrupted) => {
                // Discarded by stop(); the handle is simply abandoned.
            }
            Err(e) => {
                // A render failure rejects only this chunk — the queue
                // advances to the next one.
                log::warn!("playback: render failed: {e}");
                let _ = done.send(Err(e));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::sink::MockSink;
    use super::*;
    use std::time::Duration;

    fn chunk(samples: usize) -> AudioChunk {
        // 24 kHz mono; 24 000 samples = 1 s of virtual render time.
        AudioChunk::new(vec![0.0; samples], 24_000)
    }

    #[tokio::test(start_paused = true)]
    async fn single_chunk_renders_and_resolves() {
        let sink = Arc::new(MockSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        queue.enqueue(chunk(240)).wait().await.unwrap();
        assert_eq!(sink.finished(), vec![240]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_render_in_fifo_order_without_overlap() {
        let sink = Arc::new(MockSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        let a = queue.enqueue(chunk(240));
        let b = queue.enqueue(chunk(480));
        let c = queue.enqueue(chunk(120));

        a.wait().await.unwrap();
        b.wait().await.unwrap();
        c.wait().await.unwrap();

        assert_eq!(sink.finished(), vec![240, 480, 120]);
        assert!(!sink.overlapped());
    }

    #[tokio::test(start_paused = true)]
    async fn started_fires_before_completion() {
        let sink = Arc::new(MockSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        let mut handle = queue.enqueue(chunk(24_000));
        handle.started().await.unwrap();
        // The chunk is now in the render slot but has not finished.
        assert_eq!(sink.finished(), Vec::<usize>::new());
        handle.wait().await.unwrap();
        assert_eq!(sink.finished(), vec![24_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_active_and_pending_chunks() {
        let sink = Arc::new(MockSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        let mut a = queue.enqueue(chunk(24_000));
        let b = queue.enqueue(chunk(240));

        // Let the first chunk reach the render slot, then stop everything.
        a.started().await.unwrap();
        queue.stop();

        assert_eq!(a.wait().await, Err(PlaybackError::Interrupted));
        assert_eq!(b.wait().await, Err(PlaybackError::Interrupted));
        assert_eq!(sink.finished(), Vec::<usize>::new());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn queue_is_usable_after_stop() {
        let sink = Arc::new(MockSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        let mut doomed = queue.enqueue(chunk(24_000));
        doomed.started().await.unwrap();
        queue.stop();
        let _ = doomed.wait().await;

        queue.enqueue(chunk(480)).wait().await.unwrap();
        assert_eq!(sink.finished(), vec![480]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_rejects_only_itself() {
        // Second render call fails; first and third must still complete.
        let sink = Arc::new(MockSink::failing_on(&[1]));
        let queue = PlaybackQueue::new(sink.clone());

        let a = queue.enqueue(chunk(240));
        let b = queue.enqueue(chunk(480));
        let c = queue.enqueue(chunk(120));

        a.wait().await.unwrap();
        assert!(matches!(b.wait().await, Err(PlaybackError::Device(_))));
        c.wait().await.unwrap();

        assert_eq!(sink.finished(), vec![240, 120]);
    }

    #[tokio::test(start_paused = true)]
    async fn renders_never_overlap_under_rapid_enqueue() {
        let sink = Arc::new(MockSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        let handles: Vec<_> = (1..=8).map(|i| queue.enqueue(chunk(i * 100))).collect();
        for h in handles {
            h.wait().await.unwrap();
        }

        assert!(!sink.overlapped());
        assert_eq!(
            sink.finished(),
            vec![100, 200, 300, 400, 500, 600, 700, 800]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn len_counts_waiting_and_rendering() {
        let sink = Arc::new(MockSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        assert_eq!(queue.len(), 0);
        let mut a = queue.enqueue(chunk(24_000));
        let _b = queue.enqueue(chunk(240));
        a.started().await.unwrap();
        assert_eq!(queue.len(), 2); // one rendering + one waiting

        // Allow the first chunk (1 s) to finish sounding.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(queue.len() <= 1);
    }
}
