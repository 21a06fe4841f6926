//! End-of-turn detection over a continuous capture engine.
//!
//! [`TurnDetector`] owns the capture session lifecycle:
//!
//! ```text
//! start_capture()
//!   └─▶ session task
//!         ├─ Interim  → update partial, restart quiet timer + watchdog
//!         ├─ quiet fires over non-empty partial
//!         │     → deliberate engine stop → TurnComplete (exactly once)
//!         ├─ watchdog fires (engine silent too long)
//!         │     → force-stop → auto-restart (bounded) → Stalled
//!         └─ Ended { reason } → restart policy per reason
//! ```
//!
//! Both timers are pinned `tokio::time::sleep`s reset inside the session
//! loop, so every exit path cancels them by construction — no timer can
//! outlive its session.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, Notify};

use crate::config::TurnConfig;

use super::engine::{CaptureEngine, CaptureError, CaptureEvent, EndReason};

// ---------------------------------------------------------------------------
// TurnTranscript / TurnEvent
// ---------------------------------------------------------------------------

/// One finalized spoken turn.  Produced at most once per capture session and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnTranscript {
    /// The recognized text, trimmed.
    pub text: String,
    /// When the turn was finalized.
    pub timestamp: Instant,
}

/// Events emitted by the turn detector.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Silence followed non-empty speech: the turn is complete.
    TurnComplete(TurnTranscript),
    /// The engine kept dying without producing a turn and the restart bound
    /// is exhausted.
    Stalled,
    /// A terminal capture failure (currently only permission denial).
    Failed(CaptureError),
}

// ---------------------------------------------------------------------------
// TurnDetector
// ---------------------------------------------------------------------------

struct Session {
    cancel: Arc<Notify>,
    partial: Arc<Mutex<String>>,
    task: tokio::task::JoinHandle<()>,
}

/// Continuous speech capture with silence-based end-of-turn detection, a
/// stall watchdog, and bounded auto-restart.
///
/// Emits [`TurnEvent`]s on the channel supplied at construction.  All
/// methods are `&self` so the detector can live behind an `Arc` shared with
/// the orchestrator's spawned tasks.
pub struct TurnDetector {
    engine: Arc<dyn CaptureEngine>,
    config: TurnConfig,
    events: mpsc::Sender<TurnEvent>,
    session: Mutex<Option<Session>>,
}

impl TurnDetector {
    /// Create a detector over `engine`, reporting on `events`.
    pub fn new(
        engine: Arc<dyn CaptureEngine>,
        config: TurnConfig,
        events: mpsc::Sender<TurnEvent>,
    ) -> Self {
        Self {
            engine,
            config,
            events,
            session: Mutex::new(None),
        }
    }

    /// Begin capturing.  A no-op when a session is already live.
    pub fn start_capture(&self) {
        let mut guard = self.session.lock().unwrap();
        if guard.as_ref().is_some_and(|s| !s.task.is_finished()) {
            log::debug!("turn: start_capture ignored, session already live");
            return;
        }

        let cancel = Arc::new(Notify::new());
        let partial = Arc::new(Mutex::new(String::new()));
        let task = tokio::spawn(run_session(
            Arc::clone(&self.engine),
            self.config.clone(),
            self.events.clone(),
            Arc::clone(&cancel),
            Arc::clone(&partial),
        ));
        *guard = Some(Session {
            cancel,
            partial,
            task,
        });
    }

    /// Stop capturing without emitting a turn.  A no-op when idle.
    pub fn stop_capture(&self) {
        if let Some(session) = self.session.lock().unwrap().take() {
            session.cancel.notify_one();
        }
    }

    /// Clear the live partial transcript.
    ///
    /// An already-armed quiet timer will then fire over empty text and do
    /// nothing, so speech recognised *before* the reset can no longer
    /// complete a turn.
    pub fn reset_partial(&self) {
        if let Some(session) = self.session.lock().unwrap().as_ref() {
            session.partial.lock().unwrap().clear();
        }
    }

    /// Returns `true` while a capture session is live.
    pub fn is_capturing(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

enum SessionOutcome {
    /// Quiet period elapsed over non-empty speech.
    Turn(TurnTranscript),
    /// `stop_capture` ended the session.
    Cancelled,
    /// The stall watchdog force-stopped the engine.
    Watchdog,
    /// The engine terminated on its own.
    Ended(EndReason),
}

/// Outer restart loop: runs capture attempts until a turn completes, the
/// session is cancelled, a terminal error occurs, or the restart bound is
/// exhausted.
async fn run_session(
    engine: Arc<dyn CaptureEngine>,
    config: TurnConfig,
    events: mpsc::Sender<TurnEvent>,
    cancel: Arc<Notify>,
    partial: Arc<Mutex<String>>,
) {
    let mut restarts: u32 = 0;

    loop {
        partial.lock().unwrap().clear();
        let (tx, mut rx) = mpsc::channel::<CaptureEvent>(32);

        if let Err(e) = engine.start(tx).await {
            match e {
                CaptureError::PermissionDenied => {
                    log::warn!("turn: capture permission denied");
                    let _ = events.send(TurnEvent::Failed(e)).await;
                    return;
                }
                CaptureError::Aborted => {
                    restarts = 0;
                    continue;
                }
                other => {
                    log::warn!("turn: engine failed to start: {other}");
                    restarts += 1;
                    if restarts > config.max_restarts {
                        let _ = events.send(TurnEvent::Stalled).await;
                        return;
                    }
                    continue;
                }
            }
        }

        match drive(&mut rx, &*engine, &config, &cancel, &partial).await {
            SessionOutcome::Turn(transcript) => {
                log::info!("turn: complete ({} chars)", transcript.text.len());
                let _ = events.send(TurnEvent::TurnComplete(transcript)).await;
                return;
            }
            SessionOutcome::Cancelled => return,
            SessionOutcome::Watchdog => {
                log::warn!("turn: stall watchdog fired, restarting capture");
                restarts += 1;
                if restarts > config.max_restarts {
                    let _ = events.send(TurnEvent::Stalled).await;
                    return;
                }
            }
            SessionOutcome::Ended(reason) => match reason {
                // Stopped without a completed turn: somebody else ended the
                // engine deliberately — not ours to restart.
                EndReason::Stopped => return,
                EndReason::PermissionDenied => {
                    log::warn!("turn: capture permission revoked mid-session");
                    let _ = events
                        .send(TurnEvent::Failed(CaptureError::PermissionDenied))
                        .await;
                    return;
                }
                EndReason::Aborted => {
                    log::debug!("turn: engine aborted (intentional), restarting");
                    restarts = 0;
                }
                EndReason::NoSpeech | EndReason::Unknown => {
                    log::warn!("turn: engine ended unexpectedly ({reason:?}), restarting");
                    restarts += 1;
                    if restarts > config.max_restarts {
                        let _ = events.send(TurnEvent::Stalled).await;
                        return;
                    }
                }
            },
        }
    }
}

/// One capture attempt: consume engine events under the quiet timer and the
/// stall watchdog until something decides the attempt's fate.
async fn drive(
    rx: &mut mpsc::Receiver<CaptureEvent>,
    engine: &dyn CaptureEngine,
    config: &TurnConfig,
    cancel: &Notify,
    partial: &Mutex<String>,
) -> SessionOutcome {
    // Armed only after the first interim; parked far in the future until
    // then so the select arm stays quiet.
    let quiet = tokio::time::sleep(FAR_FUTURE);
    tokio::pin!(quiet);
    let mut quiet_armed = false;

    let watchdog = tokio::time::sleep(config.watchdog());
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(CaptureEvent::Interim { transcript }) => {
                    *partial.lock().unwrap() = transcript;
                    let now = tokio::time::Instant::now();
                    // Every update cancels and restarts the quiet timer; the
                    // watchdog resets on any sign of life.
                    quiet.as_mut().reset(now + config.quiet_period());
                    quiet_armed = true;
                    watchdog.as_mut().reset(now + config.watchdog());
                }
                Some(CaptureEvent::Ended { reason }) => return SessionOutcome::Ended(reason),
                // Event channel closed without a terminal event.
                None => return SessionOutcome::Ended(EndReason::Unknown),
            },

            _ = &mut quiet, if quiet_armed => {
                let text = {
                    let mut p = partial.lock().unwrap();
                    std::mem::take(&mut *p)
                };
                let text = text.trim().to_string();
                if text.is_empty() {
                    // reset_partial() beat us to it; keep listening.
                    quiet_armed = false;
                    continue;
                }
                // Deliberate stop: the engine's Ended { Stopped } follows,
                // but the turn is already decided.
                engine.stop().await;
                return SessionOutcome::Turn(TurnTranscript {
                    text,
                    timestamp: Instant::now(),
                });
            },

            _ = &mut watchdog => {
                engine.stop().await;
                return SessionOutcome::Watchdog;
            },

            _ = cancel.notified() => {
                engine.stop().await;
                return SessionOutcome::Cancelled;
            },
        }
    }
}

/// Park value for the unarmed quiet timer.
const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86_400);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::engine::ScriptedCapture;
    use super::*;
    use std::time::Duration;

    fn detector(
        engine: ScriptedCapture,
        config: TurnConfig,
    ) -> (Arc<TurnDetector>, mpsc::Receiver<TurnEvent>, Arc<ScriptedCapture>) {
        let engine = Arc::new(engine);
        let (tx, rx) = mpsc::channel(16);
        let det = Arc::new(TurnDetector::new(engine.clone(), config, tx));
        (det, rx, engine)
    }

    fn turn_text(event: TurnEvent) -> String {
        match event {
            TurnEvent::TurnComplete(t) => t.text,
            other => panic!("expected TurnComplete, got {other:?}"),
        }
    }

    /// Interim updates followed by the quiet period produce exactly one
    /// `TurnComplete` carrying the final transcript.
    #[tokio::test(start_paused = true)]
    async fn interims_then_quiet_complete_one_turn() {
        let script = vec![
            (0, ScriptedCapture::interim("H")),
            (50, ScriptedCapture::interim("He")),
            (50, ScriptedCapture::interim("Hello")),
        ];
        let (det, mut rx, _engine) = detector(
            ScriptedCapture::with_script(script),
            TurnConfig::default(),
        );

        det.start_capture();
        let event = rx.recv().await.unwrap();
        assert_eq!(turn_text(event), "Hello");

        // Exactly one event — nothing further arrives.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    /// Speech/silence oscillation within the quiet period keeps the turn
    /// open; only the final stretch of silence completes it.
    #[tokio::test(start_paused = true)]
    async fn oscillating_interims_still_one_turn() {
        let script = vec![
            (0, ScriptedCapture::interim("one")),
            (900, ScriptedCapture::interim("one two")),
            (900, ScriptedCapture::interim("one two three")),
            (900, ScriptedCapture::interim("one two three four")),
        ];
        let (det, mut rx, _engine) = detector(
            ScriptedCapture::with_script(script),
            TurnConfig::default(),
        );

        det.start_capture();
        assert_eq!(turn_text(rx.recv().await.unwrap()), "one two three four");
    }

    /// `reset_partial` makes an armed quiet timer fire over empty text,
    /// which must not complete a turn.
    #[tokio::test(start_paused = true)]
    async fn reset_partial_suppresses_the_pending_turn() {
        let script = vec![(0, ScriptedCapture::interim("Hello"))];
        let (det, mut rx, _engine) = detector(
            ScriptedCapture::with_script(script),
            TurnConfig::default(),
        );

        det.start_capture();
        tokio::time::sleep(Duration::from_millis(100)).await;
        det.reset_partial();

        // Well past the quiet period, still before the watchdog.
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert!(rx.try_recv().is_err());

        det.stop_capture();
    }

    /// `stop_capture` ends the session without emitting anything.
    #[tokio::test(start_paused = true)]
    async fn stop_capture_emits_nothing() {
        let script = vec![(0, ScriptedCapture::interim("Hel"))];
        let (det, mut rx, _engine) = detector(
            ScriptedCapture::with_script(script),
            TurnConfig::default(),
        );

        det.start_capture();
        tokio::time::sleep(Duration::from_millis(100)).await;
        det.stop_capture();

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert!(rx.try_recv().is_err());
        assert!(!det.is_capturing());
    }

    /// A silent engine trips the watchdog; after the restart bound the
    /// detector escalates to `Stalled`.
    #[tokio::test(start_paused = true)]
    async fn silent_engine_restarts_then_stalls() {
        // Three sessions (initial + 2 restarts), all silent.
        let (det, mut rx, engine) = detector(
            ScriptedCapture::with_sessions(vec![vec![], vec![], vec![]]),
            TurnConfig::default(),
        );

        det.start_capture();
        assert_eq!(rx.recv().await.unwrap(), TurnEvent::Stalled);
        assert_eq!(engine.starts(), 3);
    }

    /// `NoSpeech` terminations are retryable and count against the bound.
    #[tokio::test(start_paused = true)]
    async fn no_speech_exhausts_restart_bound() {
        let no_speech = || vec![(10, ScriptedCapture::ended(EndReason::NoSpeech))];
        let (det, mut rx, engine) = detector(
            ScriptedCapture::with_sessions(vec![no_speech(), no_speech(), no_speech()]),
            TurnConfig::default(),
        );

        det.start_capture();
        assert_eq!(rx.recv().await.unwrap(), TurnEvent::Stalled);
        assert_eq!(engine.starts(), 3);
    }

    /// An `Aborted` termination resets the restart counter, so interleaved
    /// aborts never accumulate into a stall.
    #[tokio::test(start_paused = true)]
    async fn aborted_resets_the_restart_counter() {
        let (det, mut rx, _engine) = detector(
            ScriptedCapture::with_sessions(vec![
                vec![(10, ScriptedCapture::ended(EndReason::NoSpeech))],
                vec![(10, ScriptedCapture::ended(EndReason::Aborted))],
                vec![(10, ScriptedCapture::ended(EndReason::NoSpeech))],
                vec![(10, ScriptedCapture::ended(EndReason::NoSpeech))],
                vec![(10, ScriptedCapture::interim("finally"))],
            ]),
            TurnConfig::default(),
        );

        det.start_capture();
        // Would have stalled on the fourth failure had Aborted counted.
        assert_eq!(turn_text(rx.recv().await.unwrap()), "finally");
    }

    /// Permission denial is terminal: one attempt, no retries.
    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_terminal() {
        let (det, mut rx, engine) = detector(
            ScriptedCapture::permission_denied(),
            TurnConfig::default(),
        );

        det.start_capture();
        assert_eq!(
            rx.recv().await.unwrap(),
            TurnEvent::Failed(CaptureError::PermissionDenied)
        );
        assert_eq!(engine.starts(), 1);
    }

    /// The quiet period is configurable; a longer setting delays the turn.
    #[tokio::test(start_paused = true)]
    async fn quiet_period_is_configurable() {
        let config = TurnConfig {
            quiet_period_ms: 2_000,
            ..TurnConfig::default()
        };
        let script = vec![(0, ScriptedCapture::interim("hi"))];
        let (det, mut rx, _engine) =
            detector(ScriptedCapture::with_script(script), config);

        det.start_capture();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        // Default quiet period would already have fired.
        assert!(rx.try_recv().is_err());

        assert_eq!(turn_text(rx.recv().await.unwrap()), "hi");
    }

    /// Starting twice does not spawn a second session.
    #[tokio::test(start_paused = true)]
    async fn start_capture_is_idempotent_while_live() {
        let script = vec![(0, ScriptedCapture::interim("hi"))];
        let (det, mut rx, engine) = detector(
            ScriptedCapture::with_sessions(vec![script, vec![]]),
            TurnConfig::default(),
        );

        det.start_capture();
        tokio::time::sleep(Duration::from_millis(50)).await;
        det.start_capture();
        assert_eq!(engine.starts(), 1);

        assert_eq!(turn_text(rx.recv().await.unwrap()), "hi");
    }
}
