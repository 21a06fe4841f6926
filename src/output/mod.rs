//! Sentence-streamed speech output.
//!
//! # Pipeline
//!
//! ```text
//! token stream → push_chunk → SentenceSegmenter → Utterance FIFO
//!             → SynthesisChannel::speak (one at a time)
//!             → PlaybackQueue (FIFO, pipelined against generation)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! use voice_loop::config::DeliveryMode;
//! use voice_loop::output::SentenceOutputQueue;
//! # use voice_loop::synth::SynthesisChannel;
//!
//! # async fn example(synth: Arc<SynthesisChannel>) {
//! let mut queue = SentenceOutputQueue::new(synth, "alloy", DeliveryMode::Streaming);
//! queue.start_stream();
//! queue.push_chunk("Hello there! How can");
//! queue.push_chunk(" I help today?");
//! queue.end_stream().await.unwrap(); // resolves after the last sentence plays
//! # }
//! ```

pub mod queue;
pub mod segmenter;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use queue::{OutputError, SentenceOutputQueue};
pub use segmenter::{SentenceSegmenter, Utterance};
