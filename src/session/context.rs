//! Relevant-context provider seam.
//!
//! Retrieval (embeddings, vector search, persistence) lives outside this
//! crate; the orchestrator only needs an ordered list of short snippets to
//! attach to a turn, fetched under a bounded wait.  When the provider is
//! slow the orchestrator substitutes an empty list — see
//! [`VoiceOrchestrator`](super::VoiceOrchestrator).

use async_trait::async_trait;

// ---------------------------------------------------------------------------
// ContextProvider trait
// ---------------------------------------------------------------------------

/// Supplies conversation context for a completed turn.
///
/// Implementations own their error handling — a provider that fails should
/// log and return an empty list rather than surface an error the session
/// could do nothing useful with.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Snippets relevant to `transcript`, most relevant first.
    async fn relevant_context(&self, transcript: &str) -> Vec<String>;
}

// Compile-time assertion: Arc<dyn ContextProvider> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: std::sync::Arc<dyn ContextProvider>) {}
};

// ---------------------------------------------------------------------------
// NoContext
// ---------------------------------------------------------------------------

/// Null provider for sessions without a retrieval subsystem.
pub struct NoContext;

#[async_trait]
impl ContextProvider for NoContext {
    async fn relevant_context(&self, _transcript: &str) -> Vec<String> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_context_returns_empty() {
        let provider = NoContext;
        assert!(provider.relevant_context("anything").await.is_empty());
    }

    #[test]
    fn no_context_is_object_safe() {
        let _: Box<dyn ContextProvider> = Box::new(NoContext);
    }
}
