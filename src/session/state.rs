//! Voice session state machine values.
//!
//! [`VoiceSessionState`] is an explicit value owned by the orchestrator and
//! mutated only through its transition function — collaborators observe it
//! over a `tokio::sync::watch` channel and never assign it directly.

// ---------------------------------------------------------------------------
// VoiceSessionState
// ---------------------------------------------------------------------------

/// States of a voice session.
///
/// The transitions are driven exclusively by
/// [`VoiceOrchestrator`](super::VoiceOrchestrator):
///
/// ```text
/// Idle ──start_listening──▶ Listening ──turn complete──▶ Processing
///                                                        ──response──▶ Speaking
/// Speaking ──playback complete──▶ Listening   (auto-resume)
///                               ▶ Idle        (auto_resume = false)
///                               ▶ Muted       (muted mid-speech)
/// any (unmuted) ──toggle_mute──▶ Muted ──toggle_mute──▶ pre-mute state
/// any ──permission denied──▶ PermissionDenied   (exits only via retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSessionState {
    /// Nothing active; waiting for `start_listening` or `speak`.
    Idle,

    /// Capture is live; the turn detector is waiting for end-of-turn.
    Listening,

    /// A turn completed; context is being fetched and the response has not
    /// started speaking yet.  Bounded by the processing ceiling.
    Processing,

    /// Synthesized speech is sounding (or streaming sentence by sentence).
    Speaking,

    /// Microphone muted by the user.  In-progress speech is left alone.
    Muted,

    /// Microphone permission was denied.  Terminal until an explicit retry.
    PermissionDenied,
}

impl VoiceSessionState {
    /// Returns `true` while the session is actively handling a turn.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            VoiceSessionState::Processing | VoiceSessionState::Speaking
        )
    }

    /// Returns `true` when capture is (or should be) live.
    pub fn is_listening(&self) -> bool {
        matches!(self, VoiceSessionState::Listening)
    }

    /// A short human-readable label suitable for a status display.
    pub fn label(&self) -> &'static str {
        match self {
            VoiceSessionState::Idle => "Idle",
            VoiceSessionState::Listening => "Listening",
            VoiceSessionState::Processing => "Thinking",
            VoiceSessionState::Speaking => "Speaking",
            VoiceSessionState::Muted => "Muted",
            VoiceSessionState::PermissionDenied => "Mic blocked",
        }
    }
}

impl Default for VoiceSessionState {
    fn default() -> Self {
        VoiceSessionState::Idle
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
