//! Sentence output queue — feeds segmented sentences through the synthesis
//! channel under the pipelining policy.
//!
//! # Streaming mode
//!
//! ```text
//! push_chunk ─▶ SentenceSegmenter ─▶ feed (mpsc) ─▶ drain task
//!                                                      │ per sentence:
//!                                                      │  speak().await      ← generation complete
//!                                                      │  (keep the handle,
//!                                                      │   don't await it)   ← playback overlaps next generation
//!                                                      ▼
//!                                      end_stream: flush remainder, close
//!                                      feed, await final handle             ← playback complete
//! ```
//!
//! Only the stream's *last* sentence blocks on playback completion; every
//! earlier sentence releases the drain loop at generation completion so
//! sentence N+1 synthesizes while N is still sounding.  Ordering under this
//! overlap is carried entirely by the synthesis channel's single slot and
//! the playback queue's FIFO — the drain loop adds no locking of its own.
//!
//! # Buffered mode
//!
//! Fragments accumulate silently; `end_stream` sends the whole text as one
//! request and always awaits playback.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::DeliveryMode;
use crate::playback::{PlaybackError, PlaybackHandle};
use crate::synth::{SynthesisChannel, SynthesisError};

use super::segmenter::{SentenceSegmenter, Utterance};

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors that can surface while draining a response stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutputError {
    /// `end_stream` was called with no stream started.
    #[error("no active output stream")]
    NoStream,

    /// A sentence failed to synthesize.
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// The final sentence failed to play out.
    #[error("playback failed: {0}")]
    Playback(#[from] PlaybackError),

    /// The drain task died before finishing.
    #[error("output drain task failed")]
    DrainFailed,
}

// ---------------------------------------------------------------------------
// SentenceOutputQueue
// ---------------------------------------------------------------------------

enum ActiveStream {
    Streaming {
        segmenter: SentenceSegmenter,
        feed: mpsc::UnboundedSender<Utterance>,
        drain: tokio::task::JoinHandle<Result<(), OutputError>>,
    },
    Buffered {
        text: String,
    },
}

/// Consumes an incremental text stream and speaks it sentence by sentence.
///
/// Cheap to construct — one per response.  `start_stream` / `push_chunk` /
/// `end_stream` must be called in order; [`abort`](Self::abort) discards an
/// in-progress stream (the caller is expected to also stop the synthesis
/// channel and playback queue, which is what actually silences audio).
pub struct SentenceOutputQueue {
    synth: Arc<SynthesisChannel>,
    voice_id: String,
    mode: DeliveryMode,
    stream: Option<ActiveStream>,
}

impl SentenceOutputQueue {
    /// Create a queue speaking through `synth` with the given voice.
    pub fn new(synth: Arc<SynthesisChannel>, voice_id: impl Into<String>, mode: DeliveryMode) -> Self {
        Self {
            synth,
            voice_id: voice_id.into(),
            mode,
            stream: None,
        }
    }

    /// Begin a new stream, discarding any previous one.
    pub fn start_stream(&mut self) {
        self.abort();
        self.stream = Some(match self.mode {
            DeliveryMode::Streaming => {
                let (feed, rx) = mpsc::unbounded_channel();
                let drain = tokio::spawn(drain(
                    Arc::clone(&self.synth),
                    self.voice_id.clone(),
                    rx,
                ));
                ActiveStream::Streaming {
                    segmenter: SentenceSegmenter::new(),
                    feed,
                    drain,
                }
            }
            DeliveryMode::Buffered => ActiveStream::Buffered {
                text: String::new(),
            },
        });
    }

    /// Append a text fragment.
    ///
    /// In streaming mode every sentence the fragment completes goes straight
    /// to the drain loop; in buffered mode the fragment only accumulates.
    pub fn push_chunk(&mut self, fragment: &str) {
        match self.stream.as_mut() {
            Some(ActiveStream::Streaming {
                segmenter, feed, ..
            }) => {
                for utterance in segmenter.push(fragment) {
                    // The drain task only exits once the feed closes, so a
                    // send can only fail after an abort.
                    let _ = feed.send(utterance);
                }
            }
            Some(ActiveStream::Buffered { text }) => text.push_str(fragment),
            None => log::warn!("output: push_chunk with no active stream"),
        }
    }

    /// Finish the stream.
    ///
    /// Streaming mode flushes a non-empty remainder as the final sentence
    /// and resolves once that sentence has *played out*.  Buffered mode
    /// issues the single accumulated request and likewise awaits playback.
    pub async fn end_stream(&mut self) -> Result<(), OutputError> {
        match self.stream.take() {
            Some(ActiveStream::Streaming {
                mut segmenter,
                feed,
                drain,
            }) => {
                if let Some(remainder) = segmenter.flush() {
                    let _ = feed.send(remainder);
                }
                drop(feed);
                drain.await.map_err(|_| OutputError::DrainFailed)?
            }
            Some(ActiveStream::Buffered { text }) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                log::debug!("output: buffered stream, speaking {} chars", text.len());
                let handle = self.synth.speak(text, &self.voice_id).await?;
                handle.wait().await?;
                Ok(())
            }
            None => Err(OutputError::NoStream),
        }
    }

    /// Discard the active stream without waiting for anything.
    pub fn abort(&mut self) {
        if let Some(ActiveStream::Streaming { drain, .. }) = self.stream.take() {
            drain.abort();
        }
    }

    /// Returns `true` while a stream is open.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for SentenceOutputQueue {
    fn drop(&mut self) {
        self.abort();
    }
}

// ---------------------------------------------------------------------------
// Drain task
// ---------------------------------------------------------------------------

/// Feed sentences to the synthesis channel one at a time.
///
/// `speak()` returns at generation completion, so the loop is already
/// requesting sentence N+1 while sentence N sounds.  Only the last handle —
/// the final sentence of the stream — is awaited to playback completion.
async fn drain(
    synth: Arc<SynthesisChannel>,
    voice_id: String,
    mut feed: mpsc::UnboundedReceiver<Utterance>,
) -> Result<(), OutputError> {
    let mut last: Option<PlaybackHandle> = None;

    while let Some(utterance) = feed.recv().await {
        log::debug!(
            "output: speaking sentence #{} ({} chars)",
            utterance.sequence,
            utterance.text.len()
        );
        let handle = synth.speak(&utterance.text, &voice_id).await?;
        // Earlier sentences only ever await generation; their handles are
        // replaced here, leaving playback to the queue's FIFO.
        last = Some(handle);
    }

    if let Some(handle) = last {
        handle.wait().await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
