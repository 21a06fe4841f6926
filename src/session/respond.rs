//! Response-generator seam.
//!
//! The conversational model is outside this crate; the orchestrator only
//! needs an incremental producer of text fragments.  Fragments carry no
//! alignment guarantees — the sentence output queue re-segments them.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// ResponseError
// ---------------------------------------------------------------------------

/// A response generator failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("response generation failed: {0}")]
pub struct ResponseError(pub String);

// ---------------------------------------------------------------------------
// ResponseGenerator trait
// ---------------------------------------------------------------------------

/// Streams a spoken-form reply to a completed turn.
///
/// Implementations send text fragments on `fragments` as they become
/// available and return when the response is complete.  Dropping the sender
/// early and returning `Ok` is equivalent to a normal finish; an `Err`
/// aborts whatever has not yet been spoken.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a reply to `transcript`, given retrieval `context`.
    async fn respond(
        &self,
        transcript: &str,
        context: &[String],
        fragments: mpsc::Sender<String>,
    ) -> Result<(), ResponseError>;
}

// Compile-time assertion: Arc<dyn ResponseGenerator> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: std::sync::Arc<dyn ResponseGenerator>) {}
};

// ---------------------------------------------------------------------------
// ScriptedResponder  (test-only)
// ---------------------------------------------------------------------------

/// A test generator that replays fixed fragments with a configurable
/// per-fragment delay and records what it was asked.
#[cfg(test)]
pub struct ScriptedResponder {
    fragments: Vec<String>,
    delay: std::time::Duration,
    calls: std::sync::Mutex<Vec<(String, Vec<String>)>>,
    hang: bool,
}

#[cfg(test)]
impl ScriptedResponder {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            delay: std::time::Duration::from_millis(10),
            calls: std::sync::Mutex::new(Vec::new()),
            hang: false,
        }
    }

    /// A generator that never produces anything and never returns — for
    /// exercising the processing ceiling.
    pub fn hanging() -> Self {
        let mut responder = Self::new(&[]);
        responder.hang = true;
        responder
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(transcript, context)` of every call, in order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ResponseGenerator for ScriptedResponder {
    async fn respond(
        &self,
        transcript: &str,
        context: &[String],
        fragments: mpsc::Sender<String>,
    ) -> Result<(), ResponseError> {
        self.calls
            .lock()
            .unwrap()
            .push((transcript.to_string(), context.to_vec()));

        if self.hang {
            std::future::pending::<()>().await;
        }
        for fragment in &self.fragments {
            tokio::time::sleep(self.delay).await;
            if fragments.send(fragment.clone()).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}
