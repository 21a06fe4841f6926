//! voice-loop — a client-side real-time voice conversation engine.
//!
//! Captures spoken input, detects turn boundaries, streams a generated
//! reply through sentence-level speech synthesis, and plays the audio back
//! with strict ordering while the next sentence is generated concurrently.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 │            VoiceOrchestrator             │
//!                 │  idle / listening / processing /         │
//!                 │  speaking / muted / permission-denied    │
//!                 └───┬────────────┬─────────────────┬───────┘
//!                     │            │                 │
//!            TurnDetector   SentenceOutputQueue   SynthesisChannel
//!                     │            │                 │
//!            CaptureEngine   SentenceSegmenter   engine worker
//!             (injected)           │                 │
//!                                  └──▶ PlaybackQueue ──▶ AudioSink
//! ```
//!
//! Recognition, text generation and retrieval are injected seams
//! ([`turn::CaptureEngine`], [`session::ResponseGenerator`],
//! [`session::ContextProvider`]); this crate owns *when* to listen, *when*
//! to speak, and how audio flows without gaps or overlaps.
//!
//! # Concurrency model
//!
//! One logical control flow per session: the orchestrator actor owns all
//! session state, synthesis runs in its own worker task reached only by
//! message passing, and the single audio device is mediated exclusively by
//! [`playback::PlaybackQueue`].  The load-bearing invariants:
//!
//! - at most one synthesis request is unresolved at a time;
//! - at most one audio chunk renders at a time, strictly FIFO;
//! - sentence N+1 generates while sentence N sounds, and ordering still
//!   holds because of the two invariants above.

pub mod config;
pub mod output;
pub mod playback;
pub mod session;
pub mod synth;
pub mod turn;
