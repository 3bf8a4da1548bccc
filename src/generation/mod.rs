//! Text-generation backends and their common interface.
//!
//! Defines the [`TextGenerator`] trait and concrete implementations:
//! - **[`GeminiGenerator`]**: calls the Gemini `generateContent` API.
//! - **[`ClaudeGenerator`]**: runs the local `claude` CLI in print mode.
//! - **[`OllamaGenerator`]**: calls a local Ollama instance's `/api/generate` endpoint.
//!
//! Backends form a closed set ([`Backend`]); [`create_generator`] builds the
//! implementation for a variant from configuration. The stable-backend
//! fallback protocol lives in [`GenerationCapability`].
//!
//! Timeouts are owned by each client (HTTP client timeout, CLI wall clock);
//! no retries happen at this layer.

mod fallback;

pub use fallback::{Generated, GenerationCapability};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ClaudeConfig, GeminiConfig, GenerationConfig, OllamaConfig};

/// The interchangeable text-generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gemini,
    Claude,
    Ollama,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Gemini, Backend::Claude, Backend::Ollama];

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Gemini => "gemini",
            Backend::Claude => "claude",
            Backend::Ollama => "ollama",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Backend::Gemini),
            "claude" => Ok(Backend::Claude),
            "ollama" => Ok(Backend::Ollama),
            other => bail!(
                "Unknown generation backend: '{}'. Must be gemini, claude, or ollama.",
                other
            ),
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Which variant this generator implements.
    fn backend(&self) -> Backend;

    /// Generate a completion for `prompt`, steered by `system_prompt`.
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String>;
}

/// Prepend the system prompt for backends without a separate system channel.
fn combine_prompts(prompt: &str, system_prompt: Option<&str>) -> String {
    match system_prompt {
        Some(system) if !system.is_empty() => format!("{}\n\n{}", system, prompt),
        _ => prompt.to_string(),
    }
}

fn non_empty(backend: Backend, text: String) -> Result<String> {
    let text = text.trim().to_string();
    if text.is_empty() {
        bail!("{} returned an empty response", backend);
    }
    Ok(text)
}

// ============ Gemini ============

/// Generator using the Gemini REST API.
///
/// Requires the API key environment variable named by
/// `generation.gemini.api_key_env` (default `GEMINI_API_KEY`).
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn backend(&self) -> Backend {
        Backend::Gemini
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [{ "text": combine_prompts(prompt, system_prompt) }] }
            ],
        });

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        non_empty(Backend::Gemini, parse_gemini_response(&json)?)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidates[0].content.parts"))?;

    Ok(parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ Claude CLI ============

/// Generator that shells out to the `claude` CLI (`claude -p <prompt>`).
pub struct ClaudeGenerator {
    command: String,
    timeout: Duration,
}

impl ClaudeGenerator {
    pub fn new(config: &ClaudeConfig) -> Result<Self> {
        if config.command.trim().is_empty() {
            bail!("generation.claude.command must not be empty");
        }
        Ok(Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl TextGenerator for ClaudeGenerator {
    fn backend(&self) -> Backend {
        Backend::Claude
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        let run = tokio::process::Command::new(&self.command)
            .arg("-p")
            .arg(combine_prompts(prompt, system_prompt))
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .with_context(|| format!("Claude CLI timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("failed to run '{}' (is the Claude CLI installed?)", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Claude CLI failed ({}): {}", output.status, stderr.trim());
        }

        non_empty(Backend::Claude, String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ============ Ollama ============

/// Generator using a local Ollama instance (`POST /api/generate`, non-streaming).
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            bail!(
                "Invalid generation.ollama.url: {}. Must start with http:// or https://",
                config.url
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn backend(&self) -> Backend {
        Backend::Ollama
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(system) = system_prompt {
            body["system"] = serde_json::Value::String(system.to_string());
        }

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))?;
        non_empty(Backend::Ollama, text.to_string())
    }
}

/// Create the generator for `backend` from configuration.
///
/// | Backend | Generator | Requires |
/// |---------|-----------|----------|
/// | `gemini` | [`GeminiGenerator`] | API key in the environment |
/// | `claude` | [`ClaudeGenerator`] | `claude` CLI on `PATH` |
/// | `ollama` | [`OllamaGenerator`] | reachable Ollama URL |
pub fn create_generator(
    backend: Backend,
    config: &GenerationConfig,
) -> Result<std::sync::Arc<dyn TextGenerator>> {
    Ok(match backend {
        Backend::Gemini => std::sync::Arc::new(GeminiGenerator::new(&config.gemini)?),
        Backend::Claude => std::sync::Arc::new(ClaudeGenerator::new(&config.claude)?),
        Backend::Ollama => std::sync::Arc::new(OllamaGenerator::new(&config.ollama)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names_round_trip() {
        for backend in Backend::ALL {
            assert_eq!(backend.name().parse::<Backend>().unwrap(), backend);
        }
        assert_eq!("Claude".parse::<Backend>().unwrap(), Backend::Claude);
        assert!("codex".parse::<Backend>().is_err());
    }

    #[test]
    fn test_combine_prompts() {
        assert_eq!(combine_prompts("body", Some("sys")), "sys\n\nbody");
        assert_eq!(combine_prompts("body", None), "body");
        assert_eq!(combine_prompts("body", Some("")), "body");
    }

    #[test]
    fn test_parse_gemini_response() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "## Week" }, { "text": " summary" }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "## Week summary");
        assert!(parse_gemini_response(&serde_json::json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn test_empty_response_is_an_error() {
        assert!(non_empty(Backend::Ollama, "  \n".into()).is_err());
        assert_eq!(non_empty(Backend::Ollama, " ok \n".into()).unwrap(), "ok");
    }

    #[test]
    fn test_ollama_rejects_bad_url() {
        let config = OllamaConfig {
            url: "localhost:11434".into(),
            ..OllamaConfig::default()
        };
        assert!(OllamaGenerator::new(&config).is_err());
    }

    #[test]
    fn test_gemini_requires_api_key() {
        let config = GeminiConfig {
            api_key_env: "PERIOD_REPORTS_TEST_UNSET_KEY".into(),
            ..GeminiConfig::default()
        };
        let err = GeminiGenerator::new(&config).err().unwrap();
        assert!(err.to_string().contains("PERIOD_REPORTS_TEST_UNSET_KEY"));
    }

    #[tokio::test]
    async fn test_claude_missing_command_fails() {
        let generator = ClaudeGenerator::new(&ClaudeConfig {
            command: "definitely-not-a-real-claude-binary".into(),
            timeout_secs: 5,
        })
        .unwrap();
        assert!(generator.generate("hi", None).await.is_err());
    }
}
