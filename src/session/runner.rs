//! Voice session orchestrator — composes capture, synthesis and playback
//! into one lifecycle.
//!
//! [`VoiceOrchestrator`] owns the [`VoiceSessionState`] and responds to
//! [`SessionCommand`]s received over a `tokio::sync::mpsc` channel.
//!
//! # Session flow
//!
//! ```text
//! SessionCommand::StartListening
//!   └─▶ cancel active synthesis/playback, start capture      [Listening]
//!
//! TurnEvent::TurnComplete
//!   └─▶ fetch context (bounded wait) ─▶ stream response      [Processing]
//!         └─ first fragment arrives                          [Speaking]
//!               └─ last sentence played ─▶ resume capture    [Listening]
//!
//! SessionCommand::Speak
//!   └─▶ stop capture, supersede active speech, synthesize    [Speaking]
//! ```
//!
//! Long-running work (speaking a text, streaming a response) runs in spawned
//! tasks that report back over an internal channel, keyed by an activity
//! sequence number so completions of superseded work are ignored.  The
//! orchestrator loop itself never blocks on audio.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::{DeliveryMode, VoiceConfig};
use crate::output::SentenceOutputQueue;
use crate::playback::PlaybackQueue;
use crate::synth::SynthesisChannel;
use crate::turn::{CaptureError, TurnDetector, TurnEvent, TurnTranscript};

use super::context::ContextProvider;
use super::respond::ResponseGenerator;
use super::state::VoiceSessionState;

// ---------------------------------------------------------------------------
// Commands and events
// ---------------------------------------------------------------------------

/// Commands accepted by a running [`VoiceOrchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Begin capturing the user's speech.
    StartListening,
    /// Stop capturing without muting.
    StopListening,
    /// Speak `text` immediately, superseding any active speech.
    Speak {
        text: String,
        /// Overrides the configured auto-resume for this one utterance.
        auto_resume: Option<bool>,
    },
    /// Mute (stops capture, leaves in-progress speech alone) or unmute.
    ToggleMute,
    /// The app moved to the background.
    EnterBackground,
    /// The app returned to the foreground.
    EnterForeground,
    /// Re-attempt capture after a permission denial.
    RetryPermission,
    /// End the session: stop capture, cancel synthesis, flush playback.
    Shutdown,
}

/// Notifications emitted by the orchestrator.
///
/// State itself travels on the `watch` channel returned by
/// [`VoiceOrchestrator::new`]; these events carry the moments a UI usually
/// cares about in between.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A turn was finalized and is about to be answered.
    TurnCaptured(TurnTranscript),
    /// Capture kept failing and the session silently returned to idle.
    TurnStalled,
    /// The response began sounding.
    ResponseStarted,
    /// The response finished (played out, failed, or was empty).
    ResponseFinished,
    /// A direct `Speak` utterance finished.
    SpeechFinished,
    /// The processing ceiling forced a reset.
    ProcessingTimedOut,
}

/// Completion messages from spawned speech/response tasks.
#[derive(Debug)]
enum Internal {
    ResponseStarted { seq: u64 },
    ResponseFinished { seq: u64, error: Option<String> },
    SpeechFinished { seq: u64, error: Option<String> },
}

// ---------------------------------------------------------------------------
// VoiceOrchestrator
// ---------------------------------------------------------------------------

/// A spawned speech or response task.  `seq` gates its completion messages:
/// once superseded, a stale completion is ignored.
struct Activity {
    seq: u64,
    task: tokio::task::JoinHandle<()>,
    auto_resume: bool,
}

/// Everything the session loop mutates.
struct SessionCore {
    config: VoiceConfig,
    state: VoiceSessionState,
    state_tx: watch::Sender<VoiceSessionState>,
    events: mpsc::Sender<SessionEvent>,
    turn: Arc<TurnDetector>,
    synth: Arc<SynthesisChannel>,
    playback: Arc<PlaybackQueue>,
    generator: Arc<dyn ResponseGenerator>,
    context: Arc<dyn ContextProvider>,
    internal_tx: mpsc::Sender<Internal>,
    activity_seq: u64,
    active: Option<Activity>,
    /// Armed while in `Processing`; forces a reset when it elapses.
    processing_deadline: Option<tokio::time::Instant>,
    /// State to restore on unmute.
    pre_mute: Option<VoiceSessionState>,
    /// Whether backgrounding interrupted a live capture.
    resume_on_foreground: bool,
}

/// Explicit finite-state voice session.
///
/// Create with [`VoiceOrchestrator::new`], then call [`run`](Self::run)
/// inside a tokio task.  The session dies with the command channel.
pub struct VoiceOrchestrator {
    core: SessionCore,
    turn_rx: mpsc::Receiver<TurnEvent>,
    internal_rx: mpsc::Receiver<Internal>,
}

impl VoiceOrchestrator {
    /// Assemble a session from its collaborators.
    ///
    /// `turn_rx` must be the receiving end of the channel `turn` emits on.
    /// Returns the orchestrator and a watch handle publishing every state
    /// transition, starting at [`VoiceSessionState::Idle`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &VoiceConfig,
        turn: Arc<TurnDetector>,
        turn_rx: mpsc::Receiver<TurnEvent>,
        synth: Arc<SynthesisChannel>,
        playback: Arc<PlaybackQueue>,
        generator: Arc<dyn ResponseGenerator>,
        context: Arc<dyn ContextProvider>,
        events: mpsc::Sender<SessionEvent>,
    ) -> (Self, watch::Receiver<VoiceSessionState>) {
        let (state_tx, state_rx) = watch::channel(VoiceSessionState::Idle);
        let (internal_tx, internal_rx) = mpsc::channel(16);

        let core = SessionCore {
            config: config.clone(),
            state: VoiceSessionState::Idle,
            state_tx,
            events,
            turn,
            synth,
            playback,
            generator,
            context,
            internal_tx,
            activity_seq: 0,
            active: None,
            processing_deadline: None,
            pre_mute: None,
            resume_on_foreground: false,
        };

        (
            Self {
                core,
                turn_rx,
                internal_rx,
            },
            state_rx,
        )
    }

    /// Run the session until `commands` closes or a `Shutdown` arrives.
    ///
    /// This is an `async fn` and should be spawned as a tokio task.
    pub async fn run(self, mut commands: mpsc::Receiver<SessionCommand>) {
        let VoiceOrchestrator {
            mut core,
            mut turn_rx,
            mut internal_rx,
        } = self;

        loop {
            let deadline = core.processing_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(SessionCommand::Shutdown) => break,
                    Some(cmd) => core.handle_command(cmd),
                },
                event = turn_rx.recv() => match event {
                    Some(ev) => core.handle_turn_event(ev),
                    // Detector gone — nothing left to listen with.
                    None => break,
                },
                message = internal_rx.recv() => {
                    if let Some(msg) = message {
                        core.handle_internal(msg);
                    }
                },
                _ = wait_until(deadline), if deadline.is_some() => {
                    core.on_processing_timeout();
                },
            }
        }

        core.shutdown();
    }
}

/// Sleep until `deadline`; pends forever when there is none (the select arm
/// is disabled then anyway).
async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Command / event handling
// ---------------------------------------------------------------------------

impl SessionCore {
    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartListening => match self.state {
                VoiceSessionState::Listening => {}
                VoiceSessionState::Muted => {
                    log::debug!("session: start_listening ignored while muted");
                }
                VoiceSessionState::PermissionDenied => {
                    log::debug!("session: start_listening ignored, permission denied");
                }
                _ => self.enter_listening(),
            },

            SessionCommand::StopListening => {
                self.turn.stop_capture();
                if self.state.is_listening() {
                    self.transition(VoiceSessionState::Idle);
                }
            }

            SessionCommand::Speak { text, auto_resume } => match self.state {
                VoiceSessionState::Muted | VoiceSessionState::PermissionDenied => {
                    log::debug!("session: speak ignored while {:?}", self.state);
                }
                _ => {
                    let auto_resume = auto_resume.unwrap_or(self.config.session.auto_resume);
                    self.begin_speech(text, auto_resume);
                }
            },

            SessionCommand::ToggleMute => self.toggle_mute(),
            SessionCommand::EnterBackground => self.enter_background(),
            SessionCommand::EnterForeground => self.enter_foreground(),

            SessionCommand::RetryPermission => {
                if self.state == VoiceSessionState::PermissionDenied {
                    self.enter_listening();
                }
            }

            // Handled by the run loop before dispatch.
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::TurnComplete(transcript) => {
                if !self.state.is_listening() {
                    log::debug!(
                        "session: turn completed while {:?}, dropped",
                        self.state
                    );
                    return;
                }
                self.emit(SessionEvent::TurnCaptured(transcript.clone()));
                self.begin_response(transcript);
            }
            TurnEvent::Stalled => {
                log::warn!("session: capture stalled, returning to idle");
                self.emit(SessionEvent::TurnStalled);
                if self.state.is_listening() {
                    self.transition(VoiceSessionState::Idle);
                }
            }
            TurnEvent::Failed(CaptureError::PermissionDenied) => {
                self.transition(VoiceSessionState::PermissionDenied);
            }
            TurnEvent::Failed(error) => {
                log::warn!("session: capture failed: {error}");
                if self.state.is_listening() {
                    self.transition(VoiceSessionState::Idle);
                }
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::ResponseStarted { seq } => {
                if self.active.as_ref().is_some_and(|a| a.seq == seq) {
                    self.processing_deadline = None;
                    self.emit(SessionEvent::ResponseStarted);
                    if self.state == VoiceSessionState::Processing {
                        self.transition(VoiceSessionState::Speaking);
                    }
                }
            }
            Internal::ResponseFinished { seq, error } => {
                let Some(auto_resume) = self.finish_activity(seq) else {
                    return;
                };
                self.processing_deadline = None;
                if let Some(e) = error {
                    log::warn!("session: response failed: {e}");
                }
                self.emit(SessionEvent::ResponseFinished);
                self.settle_after_output(auto_resume);
            }
            Internal::SpeechFinished { seq, error } => {
                let Some(auto_resume) = self.finish_activity(seq) else {
                    return;
                };
                if let Some(e) = error {
                    log::warn!("session: speech ended with error: {e}");
                }
                self.emit(SessionEvent::SpeechFinished);
                self.settle_after_output(auto_resume);
            }
        }
    }

    /// Close out the matching activity and return its auto-resume flag, or
    /// `None` for a stale completion.
    fn finish_activity(&mut self, seq: u64) -> Option<bool> {
        match &self.active {
            Some(activity) if activity.seq == seq => {
                let auto_resume = activity.auto_resume;
                self.active = None;
                Some(auto_resume)
            }
            _ => None,
        }
    }

    /// Settle the state after speech or a response finished sounding.
    fn settle_after_output(&mut self, auto_resume: bool) {
        match self.state {
            // Forced to muted mid-speech: stay there.
            VoiceSessionState::Muted => {}
            VoiceSessionState::Speaking | VoiceSessionState::Processing => {
                if auto_resume {
                    self.enter_listening();
                } else {
                    self.transition(VoiceSessionState::Idle);
                }
            }
            // Superseded or backgrounded — already settled elsewhere.
            _ => {}
        }
    }

    fn on_processing_timeout(&mut self) {
        log::warn!("session: processing ceiling reached, forcing reset");
        self.processing_deadline = None;
        self.cancel_speech_output();
        self.emit(SessionEvent::ProcessingTimedOut);
        match self.state {
            VoiceSessionState::Muted | VoiceSessionState::PermissionDenied => {}
            _ => self.transition(VoiceSessionState::Idle),
        }
    }

    // -----------------------------------------------------------------------
    // Activities
    // -----------------------------------------------------------------------

    /// Speak `text` now, superseding any active speech or response.
    fn begin_speech(&mut self, text: String, auto_resume: bool) {
        // Speaking always stops capture first, then supersedes whatever is
        // currently sounding.
        self.turn.stop_capture();
        self.cancel_speech_output();
        self.processing_deadline = None;

        self.activity_seq += 1;
        let seq = self.activity_seq;
        let synth = Arc::clone(&self.synth);
        let turn = Arc::clone(&self.turn);
        let internal = self.internal_tx.clone();
        let voice = self.config.synthesis.voice.clone();

        let task = tokio::spawn(async move {
            let error = match synth.speak(&text, &voice).await {
                Ok(mut handle) => {
                    if handle.started().await.is_ok() {
                        // Playback began: whatever partial transcript was
                        // live is no longer current.
                        turn.reset_partial();
                    }
                    handle.wait().await.err().map(|e| e.to_string())
                }
                Err(e) => Some(e.to_string()),
            };
            let _ = internal.send(Internal::SpeechFinished { seq, error }).await;
        });

        self.active = Some(Activity {
            seq,
            task,
            auto_resume,
        });
        self.transition(VoiceSessionState::Speaking);
    }

    /// Answer a completed turn: context fetch, generation, sentence-streamed
    /// speech.
    fn begin_response(&mut self, transcript: TurnTranscript) {
        self.activity_seq += 1;
        let seq = self.activity_seq;
        self.processing_deadline =
            Some(tokio::time::Instant::now() + self.config.session.processing_ceiling());

        let synth = Arc::clone(&self.synth);
        let generator = Arc::clone(&self.generator);
        let provider = Arc::clone(&self.context);
        let internal = self.internal_tx.clone();
        let voice = self.config.synthesis.voice.clone();
        let mode = self.config.output.mode;
        let context_wait = self.config.session.context_wait();

        let task = tokio::spawn(async move {
            let error =
                run_response(transcript, synth, generator, provider, internal.clone(), seq, voice, mode, context_wait)
                    .await
                    .err();
            let _ = internal
                .send(Internal::ResponseFinished { seq, error })
                .await;
        });

        self.active = Some(Activity {
            seq,
            task,
            auto_resume: self.config.session.auto_resume,
        });
        self.transition(VoiceSessionState::Processing);
    }

    // -----------------------------------------------------------------------
    // Transitions and side effects
    // -----------------------------------------------------------------------

    /// Enter `Listening`: never talk over the user — active synthesis and
    /// playback are cancelled first.
    fn enter_listening(&mut self) {
        self.cancel_speech_output();
        self.processing_deadline = None;
        self.turn.start_capture();
        self.transition(VoiceSessionState::Listening);
    }

    /// Abort the active speech/response task and silence the audio path.
    /// In-flight synthesis results are discarded, not awaited.
    fn cancel_speech_output(&mut self) {
        if let Some(activity) = self.active.take() {
            activity.task.abort();
        }
        self.synth.stop();
        self.playback.stop();
    }

    fn toggle_mute(&mut self) {
        match self.state {
            VoiceSessionState::Muted => {
                let restored = match self.pre_mute.take() {
                    Some(VoiceSessionState::Listening) => {
                        self.enter_listening();
                        true
                    }
                    // Speech or a response survived the mute: pick the
                    // lifecycle back up where it was.
                    Some(state @ (VoiceSessionState::Speaking | VoiceSessionState::Processing))
                        if self.active.is_some() =>
                    {
                        self.transition(state);
                        true
                    }
                    _ => false,
                };
                if !restored {
                    self.transition(VoiceSessionState::Idle);
                }
            }
            VoiceSessionState::PermissionDenied => {
                log::debug!("session: toggle_mute ignored, permission denied");
            }
            current => {
                self.pre_mute = Some(current);
                // Mute stops capture but leaves in-progress speech alone.
                self.turn.stop_capture();
                self.transition(VoiceSessionState::Muted);
            }
        }
    }

    fn enter_background(&mut self) {
        self.resume_on_foreground = self.state.is_listening();
        self.turn.stop_capture();
        self.cancel_speech_output();
        self.processing_deadline = None;
        match self.state {
            VoiceSessionState::Muted | VoiceSessionState::PermissionDenied => {}
            _ => self.transition(VoiceSessionState::Idle),
        }
    }

    fn enter_foreground(&mut self) {
        let resume = self.resume_on_foreground;
        self.resume_on_foreground = false;
        if resume
            && self.state != VoiceSessionState::Muted
            && self.state != VoiceSessionState::PermissionDenied
        {
            self.enter_listening();
        }
    }

    fn shutdown(&mut self) {
        log::info!("session: shutting down");
        self.turn.stop_capture();
        self.cancel_speech_output();
        self.transition(VoiceSessionState::Idle);
    }

    /// The single mutation point for [`VoiceSessionState`].
    fn transition(&mut self, to: VoiceSessionState) {
        if self.state == to {
            return;
        }
        log::debug!("session: {} → {}", self.state.label(), to.label());
        self.state = to;
        let _ = self.state_tx.send(to);
    }

    fn emit(&mut self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::debug!("session: event dropped ({e})");
        }
    }
}

// ---------------------------------------------------------------------------
// Response task body
// ---------------------------------------------------------------------------

/// Fetch context under the bounded wait, then pipe generator fragments
/// through a sentence output stream.  Resolves once the final sentence has
/// played out.
#[allow(clippy::too_many_arguments)]
async fn run_response(
    transcript: TurnTranscript,
    synth: Arc<SynthesisChannel>,
    generator: Arc<dyn ResponseGenerator>,
    provider: Arc<dyn ContextProvider>,
    internal: mpsc::Sender<Internal>,
    seq: u64,
    voice: String,
    mode: DeliveryMode,
    context_wait: std::time::Duration,
) -> Result<(), String> {
    let context = match tokio::time::timeout(
        context_wait,
        provider.relevant_context(&transcript.text),
    )
    .await
    {
        Ok(snippets) => snippets,
        Err(_) => {
            log::warn!("session: context provider timed out, continuing without context");
            Vec::new()
        }
    };

    let mut output = SentenceOutputQueue::new(synth, voice, mode);
    output.start_stream();

    let (fragment_tx, mut fragment_rx) = mpsc::channel::<String>(32);
    let respond = generator.respond(&transcript.text, &context, fragment_tx);
    tokio::pin!(respond);

    let mut generated: Option<Result<(), _>> = None;
    let mut started = false;
    loop {
        tokio::select! {
            result = &mut respond, if generated.is_none() => {
                generated = Some(result);
            }
            fragment = fragment_rx.recv() => match fragment {
                Some(fragment) => {
                    if !started {
                        started = true;
                        let _ = internal.send(Internal::ResponseStarted { seq }).await;
                    }
                    output.push_chunk(&fragment);
                }
                // Sender gone: the generator finished or dropped it early
                // (both are a normal end of stream).
                None => break,
            },
        }
    }

    match generated {
        Some(Err(e)) => {
            output.abort();
            Err(e.to_string())
        }
        // Ok, or the generator dropped its sender and is no longer of
        // interest — dropping `respond` cancels it either way.
        _ => output.end_stream().await.map_err(|e| e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
