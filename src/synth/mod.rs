//! Speech-synthesis module.
//!
//! # Architecture
//!
//! ```text
//! SynthesisChannel ──EngineRequest──▶ engine worker (own task)
//!        ▲                                 │
//!        └────────EngineResponse───────────┘
//!        │
//!        ├─ generate() → AudioChunk            (raw, unplayed)
//!        └─ speak()    → PlaybackQueue.enqueue (returns at generation
//!                        completion; PlaybackHandle resolves playback)
//!
//! Synthesizer (trait) ← HttpSynthesizer
//!                     ← FallbackSynthesizer<primary, fallback>
//! ```
//!
//! Exactly one request is unresolved at any time: the channel holds its
//! worker endpoints behind a mutex for the full exchange.  Everything else
//! in the design leans on that invariant.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_loop::config::SynthesisConfig;
//! use voice_loop::playback::{PlaybackQueue, RodioSink};
//! use voice_loop::synth::{HttpSynthesizer, SynthesisChannel};
//!
//! # async fn example() {
//! let config = SynthesisConfig::default();
//! let playback = Arc::new(PlaybackQueue::new(Arc::new(RodioSink::new().unwrap())));
//! let channel = SynthesisChannel::new(
//!     Arc::new(HttpSynthesizer::from_config(&config)),
//!     playback,
//! );
//!
//! channel.initialize(&config.model).await.unwrap();
//! let handle = channel.speak("Hello!", &config.voice).await.unwrap();
//! handle.wait().await.unwrap(); // playback completion
//! # }
//! ```

pub mod channel;
pub mod engine;
pub mod fallback;
pub mod http;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use channel::SynthesisChannel;
pub use engine::{EngineRequest, EngineResponse, SynthesisError, SynthesisRequest, Synthesizer};
pub use fallback::FallbackSynthesizer;
pub use http::HttpSynthesizer;

// test-only re-export so sibling modules' test code can import the mock
// engine without the full path.
#[cfg(test)]
pub use engine::MockSynthesizer;
