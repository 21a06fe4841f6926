//! Audio playback — decoded chunks → FIFO queue → single render slot → device.
//!
//! # Pipeline
//!
//! ```text
//! AudioChunk → PlaybackQueue::enqueue → drain task (one at a time)
//!           → AudioSink::render → output device
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_loop::playback::{AudioChunk, PlaybackQueue, RodioSink};
//!
//! # async fn example() {
//! let sink = Arc::new(RodioSink::new().unwrap());
//! let queue = PlaybackQueue::new(sink);
//!
//! let chunk = AudioChunk::new(vec![0.0; 24_000], 24_000); // 1 s of silence
//! queue.enqueue(chunk).wait().await.unwrap();
//! # }
//! ```

pub mod queue;
pub mod sink;

pub use queue::{PlaybackError, PlaybackHandle, PlaybackQueue};
pub use sink::{AudioChunk, AudioSink, RodioSink};

// test-only re-export so sibling modules' test code can import MockSink
// without `use crate::playback::sink::MockSink`.
#[cfg(test)]
pub use sink::MockSink;
