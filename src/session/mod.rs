//! Voice session orchestration.
//!
//! # Architecture
//!
//! ```text
//! SessionCommand (mpsc)
//!        │
//!        ▼
//! VoiceOrchestrator::run()  ← async tokio task, owns VoiceSessionState
//!        │
//!        ├─ TurnDetector events   → answer turns (context → generator →
//!        │                          SentenceOutputQueue)
//!        ├─ Speak / mute / background commands
//!        └─ watch::Sender<VoiceSessionState> ← observed by the app
//! ```
//!
//! The orchestrator is the only writer of the session state; collaborators
//! (and tests) observe it through the watch channel and talk back through
//! commands.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use voice_loop::config::VoiceConfig;
//! use voice_loop::playback::{PlaybackQueue, RodioSink};
//! use voice_loop::session::{
//!     NoContext, SessionCommand, VoiceOrchestrator,
//! };
//! use voice_loop::synth::{HttpSynthesizer, SynthesisChannel};
//! use voice_loop::turn::TurnDetector;
//!
//! # use voice_loop::turn::CaptureEngine;
//! # use voice_loop::session::ResponseGenerator;
//! # fn make_capture() -> Arc<dyn CaptureEngine> { unimplemented!() }
//! # fn make_generator() -> Arc<dyn ResponseGenerator> { unimplemented!() }
//! # async fn example() {
//! let config = VoiceConfig::load().unwrap();
//!
//! let playback = Arc::new(PlaybackQueue::new(Arc::new(RodioSink::new().unwrap())));
//! let synth = Arc::new(SynthesisChannel::new(
//!     Arc::new(HttpSynthesizer::from_config(&config.synthesis)),
//!     playback.clone(),
//! ));
//! synth.initialize(&config.synthesis.model).await.unwrap();
//!
//! let (turn_tx, turn_rx) = mpsc::channel(16);
//! let turn = Arc::new(TurnDetector::new(make_capture(), config.turn.clone(), turn_tx));
//!
//! let (event_tx, _events) = mpsc::channel(64);
//! let (orchestrator, _state) = VoiceOrchestrator::new(
//!     &config, turn, turn_rx, synth, playback,
//!     make_generator(), Arc::new(NoContext), event_tx,
//! );
//!
//! let (commands, command_rx) = mpsc::channel(16);
//! tokio::spawn(orchestrator.run(command_rx));
//! commands.send(SessionCommand::StartListening).await.unwrap();
//! # }
//! ```

pub mod context;
pub mod respond;
pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use context::{ContextProvider, NoContext};
pub use respond::{ResponseError, ResponseGenerator};
pub use runner::{SessionCommand, SessionEvent, VoiceOrchestrator};
pub use state::VoiceSessionState;

// test-only re-export for sibling test code.
#[cfg(test)]
pub use respond::ScriptedResponder;
