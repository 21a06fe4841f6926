//! Engine settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//!
//! The timing defaults (quiet period, stall watchdog, restart bound, context
//! wait, processing ceiling) are product-tuning values, not structural
//! requirements — every one of them is a plain field that callers may
//! override before constructing a session.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// DeliveryMode
// ---------------------------------------------------------------------------

/// Selects how streamed response text reaches the synthesis channel.
///
/// | Variant   | Behaviour                                                |
/// |-----------|----------------------------------------------------------|
/// | Streaming | Sentences synthesize as soon as a boundary is detected   |
/// | Buffered  | Nothing synthesizes until the stream ends (one request)  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Sentence-at-a-time synthesis with generation/playback pipelining.
    Streaming,
    /// Accumulate the whole response, then synthesize it as one request.
    /// For constrained clients that cannot afford pipelined requests.
    Buffered,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        Self::Streaming
    }
}

// ---------------------------------------------------------------------------
// TurnConfig
// ---------------------------------------------------------------------------

/// Settings for speech capture and end-of-turn detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Milliseconds of silence after non-empty interim speech that end the
    /// turn.
    pub quiet_period_ms: u64,
    /// Milliseconds without *any* engine output before the stall watchdog
    /// force-stops the capture engine.
    pub watchdog_ms: u64,
    /// Maximum automatic capture restarts after unintentional terminations
    /// before the detector gives up and reports a stall.
    pub max_restarts: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1_000,
            watchdog_ms: 8_000,
            max_restarts: 2,
        }
    }
}

impl TurnConfig {
    /// Quiet period as a [`Duration`].
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Stall watchdog timeout as a [`Duration`].
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }
}

// ---------------------------------------------------------------------------
// SynthesisConfig
// ---------------------------------------------------------------------------

/// Settings for the speech-synthesis backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Base URL of an OpenAI-compatible `/v1/audio/speech` endpoint.
    pub base_url: String,
    /// API key — `None` for local servers that require no authentication.
    pub api_key: Option<String>,
    /// Model identifier sent to the endpoint (also used as the `Init`
    /// model id for local engines).
    pub model: String,
    /// Voice identifier attached to every synthesis request.
    pub voice: String,
    /// Sample rate of the raw PCM audio the endpoint returns.
    pub pcm_sample_rate: u32,
    /// Maximum seconds to wait for a synthesis response before timing out.
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8880".into(),
            api_key: None,
            model: "tts-1".into(),
            voice: "alloy".into(),
            pcm_sample_rate: 24_000,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// OutputConfig
// ---------------------------------------------------------------------------

/// Settings for the sentence output queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Streaming (pipelined, sentence-at-a-time) or buffered delivery.
    pub mode: DeliveryMode,
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings for the voice-session orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Milliseconds to wait for the relevant-context provider before
    /// substituting an empty context list.
    pub context_wait_ms: u64,
    /// Hard ceiling, in seconds, on time spent in the `Processing` state
    /// before the session is forcibly reset to idle.
    pub processing_ceiling_secs: u64,
    /// Whether completed speech automatically resumes listening.
    pub auto_resume: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_wait_ms: 5_000,
            processing_ceiling_secs: 60,
            auto_resume: true,
        }
    }
}

impl SessionConfig {
    /// Context-provider wait bound as a [`Duration`].
    pub fn context_wait(&self) -> Duration {
        Duration::from_millis(self.context_wait_ms)
    }

    /// Processing-state ceiling as a [`Duration`].
    pub fn processing_ceiling(&self) -> Duration {
        Duration::from_secs(self.processing_ceiling_secs)
    }
}

// ---------------------------------------------------------------------------
// VoiceConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level engine configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_loop::config::VoiceConfig;
///
/// // Load (returns Default when file is missing)
/// let config = VoiceConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Capture / end-of-turn settings.
    pub turn: TurnConfig,
    /// Speech-synthesis backend settings.
    pub synthesis: SynthesisConfig,
    /// Sentence output queue settings.
    pub output: OutputConfig,
    /// Orchestrator settings.
    pub session: SessionConfig,
}

impl VoiceConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(VoiceConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Verify that a default `VoiceConfig` can be serialised to TOML and
    /// deserialised back without any data loss.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = VoiceConfig::default();
        original.save_to(&path).expect("save");

        let loaded = VoiceConfig::load_from(&path).expect("load");

        // TurnConfig
        assert_eq!(original.turn.quiet_period_ms, loaded.turn.quiet_period_ms);
        assert_eq!(original.turn.watchdog_ms, loaded.turn.watchdog_ms);
        assert_eq!(original.turn.max_restarts, loaded.turn.max_restarts);

        // SynthesisConfig
        assert_eq!(original.synthesis.base_url, loaded.synthesis.base_url);
        assert_eq!(original.synthesis.api_key, loaded.synthesis.api_key);
        assert_eq!(original.synthesis.model, loaded.synthesis.model);
        assert_eq!(original.synthesis.voice, loaded.synthesis.voice);
        assert_eq!(
            original.synthesis.pcm_sample_rate,
            loaded.synthesis.pcm_sample_rate
        );
        assert_eq!(
            original.synthesis.timeout_secs,
            loaded.synthesis.timeout_secs
        );

        // OutputConfig
        assert_eq!(original.output.mode, loaded.output.mode);

        // SessionConfig
        assert_eq!(
            original.session.context_wait_ms,
            loaded.session.context_wait_ms
        );
        assert_eq!(
            original.session.processing_ceiling_secs,
            loaded.session.processing_ceiling_secs
        );
        assert_eq!(original.session.auto_resume, loaded.session.auto_resume);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = VoiceConfig::load_from(&path).expect("should not error");
        let default = VoiceConfig::default();

        assert_eq!(config.turn.quiet_period_ms, default.turn.quiet_period_ms);
        assert_eq!(config.synthesis.model, default.synthesis.model);
        assert_eq!(config.output.mode, default.output.mode);
        assert_eq!(config.session.auto_resume, default.session.auto_resume);
    }

    /// Verify the reference tuning values.
    #[test]
    fn default_values_are_reference_tuning() {
        let cfg = VoiceConfig::default();

        assert_eq!(cfg.turn.quiet_period_ms, 1_000);
        assert_eq!(cfg.turn.watchdog_ms, 8_000);
        assert_eq!(cfg.turn.max_restarts, 2);
        assert_eq!(cfg.synthesis.pcm_sample_rate, 24_000);
        assert!(cfg.synthesis.api_key.is_none());
        assert_eq!(cfg.output.mode, DeliveryMode::Streaming);
        assert_eq!(cfg.session.context_wait_ms, 5_000);
        assert_eq!(cfg.session.processing_ceiling_secs, 60);
        assert!(cfg.session.auto_resume);
    }

    /// Verify that modified non-default values survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = VoiceConfig::default();
        cfg.turn.quiet_period_ms = 750;
        cfg.turn.max_restarts = 5;
        cfg.synthesis.base_url = "https://api.openai.com".into();
        cfg.synthesis.api_key = Some("sk-test".into());
        cfg.synthesis.voice = "nova".into();
        cfg.output.mode = DeliveryMode::Buffered;
        cfg.session.auto_resume = false;

        cfg.save_to(&path).expect("save");
        let loaded = VoiceConfig::load_from(&path).expect("load");

        assert_eq!(loaded.turn.quiet_period_ms, 750);
        assert_eq!(loaded.turn.max_restarts, 5);
        assert_eq!(loaded.synthesis.base_url, "https://api.openai.com");
        assert_eq!(loaded.synthesis.api_key, Some("sk-test".into()));
        assert_eq!(loaded.synthesis.voice, "nova");
        assert_eq!(loaded.output.mode, DeliveryMode::Buffered);
        assert!(!loaded.session.auto_resume);
    }

    /// Duration helpers must agree with the raw fields.
    #[test]
    fn duration_helpers() {
        let cfg = VoiceConfig::default();
        assert_eq!(cfg.turn.quiet_period(), Duration::from_millis(1_000));
        assert_eq!(cfg.turn.watchdog(), Duration::from_millis(8_000));
        assert_eq!(cfg.session.context_wait(), Duration::from_millis(5_000));
        assert_eq!(cfg.session.processing_ceiling(), Duration::from_secs(60));
    }
}
