//! Speech capture and end-of-turn detection.
//!
//! # Architecture
//!
//! ```text
//! CaptureEngine (trait) ──CaptureEvent──▶ TurnDetector session task
//!                                           │
//!                    quiet period over speech│  watchdog / restart bound
//!                                           ▼
//!                        TurnEvent::{TurnComplete, Stalled, Failed}
//! ```
//!
//! The detector never inspects audio — the engine boundary delivers interim
//! *text* and a terminal end reason, and this module supplies only the
//! timing policy: when a turn is over, when the engine has stalled, and how
//! many times to restart it before giving up.

pub mod detector;
pub mod engine;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use detector::{TurnDetector, TurnEvent, TurnTranscript};
pub use engine::{CaptureEngine, CaptureError, CaptureEvent, EndReason};

// test-only re-export so sibling modules' test code can import the scripted
// engine without the full path.
#[cfg(test)]
pub use engine::ScriptedCapture;
