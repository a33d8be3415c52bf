//! Language-Model Adapter contract (§4.3).
//!
//! Concrete transport clients are out of this crate's scope (§1) — this
//! module defines the trait every adapter must satisfy plus a scriptable
//! test double used by the end-to-end scenarios in §8.

pub mod retry;

use crate::context::Tokenizer;
use crate::error::LlmError;
use async_trait::async_trait;
use std::sync::Mutex;

/// One turn in a chat-style completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// An opaque token returned by an adapter that supports provider-side context
/// pre-caching (§4.3, §9 "Mega-context cache hints"). Callers pass it back in
/// a later [`GenerationParams::cache_handle`] unchanged; only the adapter that
/// issued it knows how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle(pub String);

/// `params` fields recognized by `generateText`/`completeChat` (§4.3).
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop_sequences: Vec<String>,
    pub system_instruction: Option<String>,
    /// An opaque token from a prior `prepare_context_for_model` call.
    pub cache_handle: Option<CacheHandle>,
}

/// Abstract boundary to an LLM-backed service. Adapters are expected to call
/// [`retry::with_backoff`] internally around their own transport calls.
#[async_trait]
pub trait LanguageModelAdapter: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError>;

    async fn complete_chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Parameterized variant of `generate_text` accepting the full `params`
    /// set from §4.3 (model override, temperature, stop sequences, a prior
    /// cache handle, ...). The default implementation ignores `params` and
    /// delegates to `generate_text`, which is correct for any adapter that
    /// does not support per-call overrides or provider-side caching.
    async fn generate_text_with_params(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        self.generate_text(prompt).await
    }

    /// Parameterized variant of `complete_chat`, analogous to
    /// `generate_text_with_params`.
    async fn complete_chat_with_params(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        self.complete_chat(messages).await
    }

    /// Returns a function suitable for `ContextAssembler::new`.
    fn get_tokenizer(&self) -> Tokenizer;

    fn get_max_context_tokens(&self) -> usize;

    fn get_service_name(&self) -> &str;

    /// Optional provider-side context pre-caching (§4.3): when an adapter
    /// supports it, this may stash `context_parts` with the provider and
    /// return a handle later `generate_text_with_params`/
    /// `complete_chat_with_params` calls can reuse via
    /// `GenerationParams::cache_handle`. `enable_cache`/`ttl_seconds` mirror
    /// the mega-context spec's `enableMegaContextCache`/
    /// `megaContextCacheTTLSeconds` hints, passed through opaquely. The
    /// default implementation supports no such caching and always returns
    /// `None`.
    fn prepare_context_for_model(
        &self,
        _context_parts: &[String],
        _enable_cache: bool,
        _ttl_seconds: Option<u64>,
    ) -> Option<CacheHandle> {
        None
    }
}

/// A scriptable adapter for tests: returns queued responses in order, or an
/// error when its queue holds one. This is the "external collaborator" stub
/// named in §1, never a production transport.
pub struct TestAdapter {
    service_name: String,
    max_context_tokens: usize,
    responses: Mutex<std::collections::VecDeque<Result<String, LlmError>>>,
}

impl TestAdapter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            max_context_tokens: 100_000,
            responses: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn queue_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    fn next(&self) -> Result<String, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no queued response".into())))
    }
}

#[async_trait]
impl LanguageModelAdapter for TestAdapter {
    async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
        self.next()
    }

    async fn complete_chat(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.next()
    }

    fn get_tokenizer(&self) -> Tokenizer {
        crate::context::word_count_tokenizer()
    }

    fn get_max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    fn get_service_name(&self) -> &str {
        &self.service_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_adapter_returns_queued_responses_in_order() {
        let adapter = TestAdapter::new("test");
        adapter.queue_response("first");
        adapter.queue_response("second");

        assert_eq!(adapter.generate_text("x").await.unwrap(), "first");
        assert_eq!(adapter.generate_text("x").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_adapter_surfaces_queued_errors() {
        let adapter = TestAdapter::new("test");
        adapter.queue_error(LlmError::RateLimited("slow down".into()));

        let err = adapter.generate_text("x").await.unwrap_err();
        assert!(err.is_transient());
    }

    /// An adapter whose `prepare_context_for_model` issues a real handle and
    /// whose `generate_text_with_params` checks it was handed back,
    /// exercising the full opaque pre-caching contract (§4.3, §9).
    struct CachingAdapter;

    #[async_trait]
    impl LanguageModelAdapter for CachingAdapter {
        async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("uncached".into())
        }

        async fn complete_chat(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            Ok("uncached".into())
        }

        async fn generate_text_with_params(
            &self,
            _prompt: &str,
            params: &GenerationParams,
        ) -> Result<String, LlmError> {
            match &params.cache_handle {
                Some(handle) => Ok(format!("served from cache handle {}", handle.0)),
                None => Ok("uncached".into()),
            }
        }

        fn get_tokenizer(&self) -> Tokenizer {
            crate::context::word_count_tokenizer()
        }

        fn get_max_context_tokens(&self) -> usize {
            50_000
        }

        fn get_service_name(&self) -> &str {
            "caching-adapter"
        }

        fn prepare_context_for_model(
            &self,
            context_parts: &[String],
            enable_cache: bool,
            _ttl_seconds: Option<u64>,
        ) -> Option<CacheHandle> {
            if enable_cache && !context_parts.is_empty() {
                Some(CacheHandle("handle-1".into()))
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn adapter_with_caching_support_reuses_issued_handle() {
        let adapter = CachingAdapter;
        let handle = adapter.prepare_context_for_model(&["big context".into()], true, Some(300));
        assert_eq!(handle, Some(CacheHandle("handle-1".into())));

        let params = GenerationParams {
            cache_handle: handle,
            ..Default::default()
        };
        let result = adapter.generate_text_with_params("prompt", &params).await.unwrap();
        assert_eq!(result, "served from cache handle handle-1");
    }

    #[tokio::test]
    async fn adapter_without_caching_support_defaults_to_no_handle() {
        let adapter = TestAdapter::new("test");
        let handle = adapter.prepare_context_for_model(&["x".into()], true, None);
        assert_eq!(handle, None);
    }
}
