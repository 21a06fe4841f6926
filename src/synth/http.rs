//! HTTP-backed [`Synthesizer`] for OpenAI-compatible speech endpoints.
//!
//! `HttpSynthesizer` calls any `/v1/audio/speech` endpoint — OpenAI,
//! Kokoro-FastAPI, openedai-speech, LocalAI, etc. — requesting raw PCM so
//! no codec is needed client-side.  All connection details come from
//! [`SynthesisConfig`]; nothing is hardcoded.

use async_trait::async_trait;

use crate::config::SynthesisConfig;
use crate::playback::AudioChunk;

use super::engine::{SynthesisError, Synthesizer};

// ---------------------------------------------------------------------------
// HttpSynthesizer
// ---------------------------------------------------------------------------

/// Calls an OpenAI-compatible `/v1/audio/speech` endpoint.
///
/// The endpoint is asked for `response_format: "pcm"` — headerless 16-bit
/// little-endian mono at the server's fixed rate (`pcm_sample_rate` in the
/// config) — which decodes straight to `f32` samples.
///
/// # No hardcoded URLs
/// All connection details (`base_url`, `api_key`, `model`) come exclusively
/// from the [`SynthesisConfig`] passed to [`HttpSynthesizer::from_config`].
pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl HttpSynthesizer {
    /// Build an `HttpSynthesizer` from engine config.
    ///
    /// The HTTP client is pre-configured with the per-request timeout from
    /// `config.timeout_secs`.  A default (no-timeout) client is used as a
    /// last-resort fallback if the builder fails (should never happen in
    /// practice).
    pub fn from_config(config: &SynthesisConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    /// Remote engines load nothing locally; `prepare` only records that the
    /// configured endpoint will be used as-is.
    async fn prepare(&self, model_id: &str) -> Result<(), SynthesisError> {
        log::debug!(
            "synth: http engine ready (endpoint {}, model {model_id})",
            self.config.base_url
        );
        Ok(())
    }

    /// Prime the connection pool and the server's fast path with a tiny
    /// request whose audio is thrown away.
    async fn warm_up(&self) {
        if let Err(e) = self.synthesize(".", &self.config.voice).await {
            log::debug!("synth: warm-up request failed (ignored): {e}");
        }
    }

    /// Send `text` to the configured endpoint and decode the PCM response.
    ///
    /// The `Authorization: Bearer …` header is attached **only** when
    /// `config.api_key` is `Some(key)` and `key` is non-empty — safe for
    /// local servers that require no authentication.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<AudioChunk, SynthesisError> {
        let url = format!("{}/v1/audio/speech", self.config.base_url);

        let body = serde_json::json!({
            "model":           self.config.model,
            "input":           text,
            "voice":           voice_id,
            "response_format": "pcm",
        });

        let mut req = self.client.post(&url).json(&body);

        // Attach Authorization header only when api_key is a non-empty string.
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            return Err(SynthesisError::Engine(format!(
                "speech endpoint returned {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        Ok(decode_pcm16(&bytes, self.config.pcm_sample_rate))
    }
}

// ---------------------------------------------------------------------------
// PCM decoding
// ---------------------------------------------------------------------------

/// Decode headerless 16-bit little-endian mono PCM into an [`AudioChunk`].
///
/// A trailing odd byte (torn frame) is ignored.
fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> AudioChunk {
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect();
    AudioChunk::new(samples, sample_rate)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
