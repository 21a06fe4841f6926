//! Capture engine boundary: trait, events and the error taxonomy.
//!
//! A capture engine is a continuous speech recognizer (platform API or
//! embedded model — recognition quality is not this crate's concern).  It
//! reports the *whole transcript so far* on every interim update and a
//! single terminal `Ended` event when the capture session dies, with a
//! reason the [`TurnDetector`](super::TurnDetector) maps onto its restart
//! policy.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors reported by the capture subsystem.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    /// The user (or platform) denied microphone access.  Terminal — no
    /// automatic retry; only an explicit re-grant recovers.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// The engine gave up without hearing anything.  Retryable.
    #[error("no speech detected")]
    NoSpeech,

    /// The engine was aborted by the platform (e.g. audio route change).
    /// Treated as intentional.
    #[error("capture engine aborted")]
    Aborted,

    /// Anything else.  Logged and retried conservatively.
    #[error("capture engine failed: {0}")]
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a capture session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// `stop()` was requested — a deliberate termination.
    Stopped,
    /// Permission was revoked mid-session.
    PermissionDenied,
    /// The engine timed out waiting for speech.
    NoSpeech,
    /// The platform aborted the engine.
    Aborted,
    /// Unclassified engine failure.
    Unknown,
}

/// Events emitted by a running capture session.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The full transcript recognised so far in this session.  Emitted on
    /// every recognizer update; each one supersedes the previous.
    Interim { transcript: String },
    /// Terminal event — the session is over.  Emitted exactly once.
    Ended { reason: EndReason },
}

// ---------------------------------------------------------------------------
// CaptureEngine trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface to a continuous speech recognizer.
///
/// # Contract
///
/// - `start` resolves once the engine is actually recording, or with
///   [`CaptureError::PermissionDenied`] when access is refused.
/// - After a successful `start`, the engine sends any number of
///   [`CaptureEvent::Interim`] updates followed by exactly one
///   [`CaptureEvent::Ended`] on `events`.
/// - `stop` requests termination; the engine answers with
///   `Ended { reason: Stopped }`.  Idempotent.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Begin a capture session, delivering events on `events`.
    async fn start(&self, events: mpsc::Sender<CaptureEvent>) -> Result<(), CaptureError>;

    /// Request the running session stop.
    async fn stop(&self);
}

// Compile-time assertion: Arc<dyn CaptureEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: std::sync::Arc<dyn CaptureEngine>) {}
};

// ---------------------------------------------------------------------------
// ScriptedCapture  (test-only)
// ---------------------------------------------------------------------------

/// A test engine that replays a pre-written script of timed events.
///
/// Each call to `start` consumes the next session script from the queue; an
/// exhausted queue yields sessions that stay silent until stopped.  Scripts
/// whose events run out without an `Ended` likewise keep the session open
/// until `stop()`.
#[cfg(test)]
pub struct ScriptedCapture {
    sessions: std::sync::Mutex<std::collections::VecDeque<Vec<(u64, CaptureEvent)>>>,
    current_stop: std::sync::Mutex<Option<std::sync::Arc<tokio::sync::Notify>>>,
    starts: std::sync::atomic::AtomicUsize,
    deny: bool,
    deny_first: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedCapture {
    /// One entry per expected session; each event is `(delay_ms, event)`
    /// relative to the previous one.
    pub fn with_sessions(sessions: Vec<Vec<(u64, CaptureEvent)>>) -> Self {
        Self {
            sessions: std::sync::Mutex::new(sessions.into()),
            current_stop: std::sync::Mutex::new(None),
            starts: std::sync::atomic::AtomicUsize::new(0),
            deny: false,
            deny_first: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Convenience: a single session script.
    pub fn with_script(script: Vec<(u64, CaptureEvent)>) -> Self {
        Self::with_sessions(vec![script])
    }

    /// An engine whose every `start` fails with permission denied.
    pub fn permission_denied() -> Self {
        let mut engine = Self::with_sessions(Vec::new());
        engine.deny = true;
        engine
    }

    /// An engine that denies the first `count` starts, then grants and
    /// replays `sessions` — models the user fixing the permission.
    pub fn denying_first(count: usize, sessions: Vec<Vec<(u64, CaptureEvent)>>) -> Self {
        let engine = Self::with_sessions(sessions);
        engine
            .deny_first
            .store(count, std::sync::atomic::Ordering::SeqCst);
        engine
    }

    /// Number of `start` calls so far.
    pub fn starts(&self) -> usize {
        self.starts.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Build an interim event.
    pub fn interim(transcript: &str) -> CaptureEvent {
        CaptureEvent::Interim {
            transcript: transcript.to_string(),
        }
    }

    /// Build an ended event.
    pub fn ended(reason: EndReason) -> CaptureEvent {
        CaptureEvent::Ended { reason }
    }
}

#[cfg(test)]
#[async_trait]
impl CaptureEngine for ScriptedCapture {
    async fn start(&self, events: mpsc::Sender<CaptureEvent>) -> Result<(), CaptureError> {
        self.starts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }
        if self
            .deny_first
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |n| n.checked_sub(1),
            )
            .is_ok()
        {
            return Err(CaptureError::PermissionDenied);
        }

        let script = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let stop = std::sync::Arc::new(tokio::sync::Notify::new());
        *self.current_stop.lock().unwrap() = Some(std::sync::Arc::clone(&stop));

        tokio::spawn(async move {
            for (delay_ms, event) in script {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {
                        let is_ended = matches!(event, CaptureEvent::Ended { .. });
                        if events.send(event).await.is_err() {
                            return;
                        }
                        if is_ended {
                            return;
                        }
                    }
                    _ = stop.notified() => {
                        let _ = events
                            .send(CaptureEvent::Ended { reason: EndReason::Stopped })
                            .await;
                        return;
                    }
                }
            }
            // Script exhausted without an Ended — stay "recording" until
            // stopped.
            stop.notified().await;
            let _ = events
                .send(CaptureEvent::Ended { reason: EndReason::Stopped })
                .await;
        });

        Ok(())
    }

    async fn stop(&self) {
        if let Some(stop) = self.current_stop.lock().unwrap().take() {
            stop.notify_one();
        }
    }
}
