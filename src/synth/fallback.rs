//! Fallback synthesizer — retries a failed request on a secondary engine.
//!
//! Fallback policy deliberately lives *outside* the synthesis channel: the
//! channel rejects the in-flight request and whoever assembled the session
//! decides whether a secondary path exists.  Wrapping the primary engine in
//! [`FallbackSynthesizer`] before handing it to the channel makes synthesis
//! failure invisible to the user while still logging every primary failure.

use async_trait::async_trait;

use crate::playback::AudioChunk;

use super::engine::{SynthesisError, Synthesizer};

// ---------------------------------------------------------------------------
// FallbackSynthesizer
// ---------------------------------------------------------------------------

/// Wraps a primary and a fallback [`Synthesizer`]; a request that fails on
/// the primary is retried once on the fallback.
///
/// # Example
/// ```rust,no_run
/// use voice_loop::config::SynthesisConfig;
/// use voice_loop::synth::{FallbackSynthesizer, HttpSynthesizer};
///
/// let remote = HttpSynthesizer::from_config(&SynthesisConfig::default());
/// let local = HttpSynthesizer::from_config(&SynthesisConfig {
///     base_url: "http://localhost:8880".into(),
///     ..SynthesisConfig::default()
/// });
/// let engine = FallbackSynthesizer::new(remote, local);
/// ```
pub struct FallbackSynthesizer<P: Synthesizer, F: Synthesizer> {
    primary: P,
    fallback: F,
}

impl<P: Synthesizer, F: Synthesizer> FallbackSynthesizer<P, F> {
    /// Wrap `primary` with `fallback` behaviour.
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    /// Return a reference to the primary engine.
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// Return a reference to the fallback engine.
    pub fn fallback(&self) -> &F {
        &self.fallback
    }
}

#[async_trait]
impl<P, F> Synthesizer for FallbackSynthesizer<P, F>
where
    P: Synthesizer + Send + Sync,
    F: Synthesizer + Send + Sync,
{
    /// Prepare both engines.  A primary that fails to prepare is logged and
    /// tolerated as long as the fallback prepares — requests will then go
    /// through the fallback path.
    async fn prepare(&self, model_id: &str) -> Result<(), SynthesisError> {
        let primary = self.primary.prepare(model_id).await;
        let fallback = self.fallback.prepare(model_id).await;
        match (primary, fallback) {
            (Ok(()), _) => Ok(()),
            (Err(e), Ok(())) => {
                log::warn!("synth: primary engine failed to prepare ({e}); fallback only");
                Ok(())
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    async fn warm_up(&self) {
        self.primary.warm_up().await;
        self.fallback.warm_up().await;
    }

    /// Try the primary; on failure, log it and retry on the fallback.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<AudioChunk, SynthesisError> {
        match self.primary.synthesize(text, voice_id).await {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                log::warn!("synth: primary engine failed ({e}); retrying on fallback");
                self.fallback.synthesize(text, voice_id).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Always succeeds, producing a chunk of the given length.
    struct AlwaysOk {
        samples: usize,
        calls: AtomicUsize,
    }

    impl AlwaysOk {
        fn new(samples: usize) -> Self {
            Self {
                samples,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Synthesizer for AlwaysOk {
        async fn prepare(&self, _model_id: &str) -> Result<(), SynthesisError> {
            Ok(())
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice_id: &str,
        ) -> Result<AudioChunk, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AudioChunk::new(vec![0.0; self.samples], 24_000))
        }
    }

    /// Always fails, at prepare and synthesize.
    struct AlwaysFails;

    #[async_trait]
    impl Synthesizer for AlwaysFails {
        async fn prepare(&self, _model_id: &str) -> Result<(), SynthesisError> {
            Err(SynthesisError::Engine("prepare refused".into()))
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice_id: &str,
        ) -> Result<AudioChunk, SynthesisError> {
            Err(SynthesisError::Engine("synthesis refused".into()))
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn primary_success_never_touches_fallback() {
        let engine = FallbackSynthesizer::new(AlwaysOk::new(10), AlwaysOk::new(20));
        let chunk = engine.synthesize("hi", "alloy").await.unwrap();
        assert_eq!(chunk.samples.len(), 10);
        assert_eq!(engine.primary().calls(), 1);
        assert_eq!(engine.fallback().calls(), 0);
    }

    #[tokio::test]
    async fn primary_failure_retries_on_fallback() {
        let engine = FallbackSynthesizer::new(AlwaysFails, AlwaysOk::new(20));
        let chunk = engine.synthesize("hi", "alloy").await.unwrap();
        assert_eq!(chunk.samples.len(), 20);
        assert_eq!(engine.fallback().calls(), 1);
    }

    #[tokio::test]
    async fn both_failing_surfaces_the_error() {
        let engine = FallbackSynthesizer::new(AlwaysFails, AlwaysFails);
        let err = engine.synthesize("hi", "alloy").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Engine(_)));
    }

    #[tokio::test]
    async fn prepare_tolerates_primary_failure() {
        let engine = FallbackSynthesizer::new(AlwaysFails, AlwaysOk::new(20));
        assert!(engine.prepare("model").await.is_ok());
    }

    #[tokio::test]
    async fn prepare_fails_when_both_fail() {
        let engine = FallbackSynthesizer::new(AlwaysFails, AlwaysFails);
        assert!(engine.prepare("model").await.is_err());
    }

    /// FallbackSynthesizer<P, F> must itself be a valid Synthesizer
    /// (object-safe behind a Box).
    #[test]
    fn fallback_is_object_safe() {
        let engine = FallbackSynthesizer::new(AlwaysOk::new(1), AlwaysOk::new(1));
        let _: Box<dyn Synthesizer> = Box::new(engine);
    }
}
