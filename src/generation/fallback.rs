//! Stable-backend fallback around the configured generators.
//!
//! Protocol for a requested backend:
//! - requested == stable: call it once, no fallback path.
//! - otherwise: call the requested backend once; on any error, warn and call
//!   the stable backend once. A second failure propagates.
//!
//! The returned [`Generated`] names the backend that actually produced the
//! text, which differs from the requested one whenever fallback happened.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{create_generator, Backend, TextGenerator};
use crate::config::GenerationConfig;

/// Text produced by a backend, with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub requested: Backend,
    pub used: Backend,
}

impl Generated {
    pub fn fell_back(&self) -> bool {
        self.requested != self.used
    }
}

/// The set of available generators plus the designated stable backend.
///
/// Constructed explicitly and passed to whoever needs it; there is no
/// process-wide instance.
pub struct GenerationCapability {
    stable: Backend,
    generators: HashMap<Backend, Arc<dyn TextGenerator>>,
    /// Backends that could not be constructed, with the reason.
    unavailable: HashMap<Backend, String>,
}

impl GenerationCapability {
    /// An empty capability; register generators with [`with_generator`](Self::with_generator).
    pub fn new(stable: Backend) -> Self {
        Self {
            stable,
            generators: HashMap::new(),
            unavailable: HashMap::new(),
        }
    }

    /// Build every backend from configuration. Backends whose construction
    /// fails (missing API key, bad URL) are recorded as unavailable; using
    /// one counts as a failed attempt.
    pub fn from_config(config: &GenerationConfig) -> Self {
        let mut capability = Self::new(config.stable);
        for backend in Backend::ALL {
            match create_generator(backend, config) {
                Ok(generator) => {
                    capability.generators.insert(backend, generator);
                }
                Err(e) => {
                    tracing::debug!(backend = %backend, error = %format!("{:#}", e), "generation backend unavailable");
                    capability.unavailable.insert(backend, format!("{:#}", e));
                }
            }
        }
        capability
    }

    /// Register (or replace) the generator for its backend.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        let backend = generator.backend();
        self.unavailable.remove(&backend);
        self.generators.insert(backend, generator);
        self
    }

    pub fn stable(&self) -> Backend {
        self.stable
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        self.generators.contains_key(&backend)
    }

    /// Generate with `requested`, falling back to the stable backend once.
    pub async fn generate(
        &self,
        requested: Backend,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<Generated> {
        if requested == self.stable {
            let text = self.attempt(requested, prompt, system_prompt).await?;
            return Ok(Generated {
                text,
                requested,
                used: requested,
            });
        }

        let first_err = match self.attempt(requested, prompt, system_prompt).await {
            Ok(text) => {
                return Ok(Generated {
                    text,
                    requested,
                    used: requested,
                })
            }
            Err(e) => e,
        };

        tracing::warn!(
            requested = %requested,
            stable = %self.stable,
            error = %format!("{:#}", first_err),
            "generation backend failed; falling back to stable backend"
        );

        match self.attempt(self.stable, prompt, system_prompt).await {
            Ok(text) => Ok(Generated {
                text,
                requested,
                used: self.stable,
            }),
            Err(stable_err) => Err(stable_err.context(format!(
                "stable backend {} failed after requested backend {} failed ({:#})",
                self.stable, requested, first_err
            ))),
        }
    }

    async fn attempt(
        &self,
        backend: Backend,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String> {
        match self.generators.get(&backend) {
            Some(generator) => generator.generate(prompt, system_prompt).await,
            None => Err(match self.unavailable.get(&backend) {
                Some(reason) => anyhow!("{} backend unavailable: {}", backend, reason),
                None => anyhow!("{} backend is not configured", backend),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGenerator {
        backend: Backend,
        reply: std::result::Result<String, String>,
        calls: AtomicUsize,
    }

    impl FakeGenerator {
        fn ok(backend: Backend, text: &str) -> Arc<Self> {
            Arc::new(Self {
                backend,
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(backend: Backend, msg: &str) -> Arc<Self> {
            Arc::new(Self {
                backend,
                reply: Err(msg.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        fn backend(&self) -> Backend {
            self.backend
        }

        async fn generate(&self, _prompt: &str, _system: Option<&str>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    #[tokio::test]
    async fn test_requested_backend_succeeds() {
        let claude = FakeGenerator::ok(Backend::Claude, "from claude");
        let gemini = FakeGenerator::ok(Backend::Gemini, "from gemini");
        let cap = GenerationCapability::new(Backend::Gemini)
            .with_generator(claude.clone())
            .with_generator(gemini.clone());

        let out = cap.generate(Backend::Claude, "p", None).await.unwrap();
        assert_eq!(out.text, "from claude");
        assert_eq!(out.used, Backend::Claude);
        assert!(!out.fell_back());
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_stable() {
        let claude = FakeGenerator::failing(Backend::Claude, "cli crashed");
        let gemini = FakeGenerator::ok(Backend::Gemini, "from gemini");
        let cap = GenerationCapability::new(Backend::Gemini)
            .with_generator(claude.clone())
            .with_generator(gemini.clone());

        let out = cap.generate(Backend::Claude, "p", Some("s")).await.unwrap();
        assert_eq!(out.text, "from gemini");
        assert_eq!(out.requested, Backend::Claude);
        assert_eq!(out.used, Backend::Gemini);
        assert!(out.fell_back());
        assert_eq!(claude.calls(), 1);
        assert_eq!(gemini.calls(), 1);
    }

    #[tokio::test]
    async fn test_both_fail_propagates() {
        let ollama = FakeGenerator::failing(Backend::Ollama, "connection refused");
        let gemini = FakeGenerator::failing(Backend::Gemini, "quota exceeded");
        let cap = GenerationCapability::new(Backend::Gemini)
            .with_generator(ollama.clone())
            .with_generator(gemini.clone());

        let err = cap.generate(Backend::Ollama, "p", None).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("quota exceeded"), "{}", msg);
        assert!(msg.contains("connection refused"), "{}", msg);
        assert_eq!(ollama.calls(), 1);
        assert_eq!(gemini.calls(), 1);
    }

    #[tokio::test]
    async fn test_stable_requested_has_no_fallback_path() {
        let gemini = FakeGenerator::failing(Backend::Gemini, "down");
        let cap = GenerationCapability::new(Backend::Gemini).with_generator(gemini.clone());

        assert!(cap.generate(Backend::Gemini, "p", None).await.is_err());
        assert_eq!(gemini.calls(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_requested_backend_falls_back() {
        let gemini = FakeGenerator::ok(Backend::Gemini, "from gemini");
        let cap = GenerationCapability::new(Backend::Gemini).with_generator(gemini.clone());

        let out = cap.generate(Backend::Claude, "p", None).await.unwrap();
        assert_eq!(out.used, Backend::Gemini);
        assert!(!cap.is_available(Backend::Claude));
    }
}
