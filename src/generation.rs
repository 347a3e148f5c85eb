//! Text generation against an OpenAI-compatible chat completions API.
//!
//! Callers go through [`Generator`], which sanitizes output and decides
//! which backend failures end a request and which become a bracketed
//! marker string in place of the text.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{sanitize::Sanitizer, text_util::truncate_chars};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const API_KEY_ENV_VAR: &str = "GROQ_API_KEY";

pub const AUTH_ERROR_MARKER: &str = "[Error: Invalid or missing GROQ_API_KEY. Please set it in your environment. Get free key at: https://console.groq.com]";
pub const RATE_LIMIT_MARKER: &str =
    "[Error: API rate limit exceeded. Please try again in a moment.]";

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("no API key configured (set GROQ_API_KEY)")]
    MissingApiKey,

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Errors no retry or fallback can fix; they abort the whole request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingApiKey | Self::Authentication(_))
    }

    /// The bracketed text substituted for output when the call fails.
    pub fn error_marker(&self) -> String {
        match self {
            Self::MissingApiKey | Self::Authentication(_) => {
                AUTH_ERROR_MARKER.to_string()
            }
            Self::RateLimited(_) => RATE_LIMIT_MARKER.to_string(),
            other => {
                format!("[Error: {}]", truncate_chars(&other.to_string(), 100))
            }
        }
    }

    /// Map a non-success HTTP response to an error class.
    pub fn from_status(status: u16, body: String) -> Self {
        let lower = body.to_lowercase();
        match status {
            401 | 403 => Self::Authentication(body),
            429 => Self::RateLimited(body),
            _ if lower.contains("api_key") || lower.contains("authentication") => {
                Self::Authentication(body)
            }
            _ if lower.contains("quota") || lower.contains("rate limit") => {
                Self::RateLimited(body)
            }
            _ => Self::Api { status, body },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

/// One chat completion: a system prompt and a user message in, text out.
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, GenerationError>;
}

impl<F> CompletionBackend for F
where
    F: Fn(&CompletionRequest) -> Result<String, GenerationError> + Send + Sync,
{
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, GenerationError> {
        self(request)
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
            api_key: None,
        }
    }
}

impl BackendConfig {
    /// Defaults plus the API key from `GROQ_API_KEY`, if set.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV_VAR)
                .ok()
                .filter(|k| !k.trim().is_empty()),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Blocking client for `POST {base_url}/chat/completions`.
///
/// Must not be created or dropped on an async executor thread; the MCP
/// server builds it before starting its runtime.
pub struct OpenAiCompatibleBackend {
    client: reqwest::blocking::Client,
    config: BackendConfig,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: BackendConfig) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl CompletionBackend for OpenAiCompatibleBackend {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, GenerationError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(GenerationError::MissingApiKey);
        };

        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::from_status(status.as_u16(), text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                GenerationError::InvalidResponse("response has no content".into())
            })
    }
}

/// A backend plus the sanitizer applied to everything it returns.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn CompletionBackend>,
    sanitizer: Sanitizer,
}

impl Generator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            sanitizer: Sanitizer::default(),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Generate and sanitize.
    ///
    /// Fatal errors (missing or rejected credentials) are returned as `Err`.
    /// Every other failure is logged and comes back as its bracketed marker
    /// so the caller's fallback rules can deal with it.
    pub fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> crate::error::Result<String> {
        match self.try_generate(system, user, max_tokens) {
            Ok(text) => Ok(text),
            Err(e) if e.is_fatal() => {
                tracing::warn!(error = %e, "generation failed");
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!(error = %e, "generation failed, using marker");
                Ok(e.error_marker())
            }
        }
    }

    /// Generate and sanitize, surfacing every backend error as-is.
    pub fn try_generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        let request = CompletionRequest {
            system: system.to_string(),
            user: user.to_string(),
            max_tokens,
        };
        tracing::debug!(
            system_chars = request.system.len(),
            user_chars = request.user.len(),
            max_tokens,
            "completion request"
        );
        let raw = self.backend.complete(&request)?;
        Ok(self.sanitizer.apply(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn generator_returning(
        result: Result<String, GenerationError>,
    ) -> Generator {
        Generator::new(Arc::new(move |_: &CompletionRequest| result.clone()))
    }

    #[test]
    fn output_is_sanitized() {
        let generator =
            generator_returning(Ok("[INST] Be   still [/INST]".into()));
        assert_eq!(generator.generate("s", "u", 10).unwrap(), "Be still");
    }

    #[test]
    fn auth_errors_are_fatal() {
        for err in [
            GenerationError::MissingApiKey,
            GenerationError::Authentication("bad key".into()),
        ] {
            let result = generator_returning(Err(err)).generate("s", "u", 10);
            assert!(matches!(result, Err(Error::Generation(_))));
        }
    }

    #[test]
    fn rate_limit_becomes_marker() {
        let generator =
            generator_returning(Err(GenerationError::RateLimited("slow".into())));
        assert_eq!(generator.generate("s", "u", 10).unwrap(), RATE_LIMIT_MARKER);
    }

    #[test]
    fn other_errors_become_truncated_marker() {
        let generator = generator_returning(Err(GenerationError::Api {
            status: 500,
            body: "x".repeat(500),
        }));
        let text = generator.generate("s", "u", 10).unwrap();

        assert!(text.starts_with("[Error: API returned status 500"));
        assert!(text.ends_with(']'));
        assert_eq!(text.chars().count(), "[Error: ]".len() + 100);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            GenerationError::from_status(401, String::new()),
            GenerationError::Authentication(_)
        ));
        assert!(matches!(
            GenerationError::from_status(429, String::new()),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            GenerationError::from_status(400, "Invalid api_key provided".into()),
            GenerationError::Authentication(_)
        ));
        assert!(matches!(
            GenerationError::from_status(400, "daily quota exhausted".into()),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            GenerationError::from_status(502, "bad gateway".into()),
            GenerationError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn request_carries_prompts_and_budget() {
        let generator = Generator::new(Arc::new(|req: &CompletionRequest| {
            Ok(format!("{}|{}|{}", req.system, req.user, req.max_tokens))
        }));
        assert_eq!(generator.generate("sys", "usr", 42).unwrap(), "sys|usr|42");
    }

    #[test]
    fn missing_key_fails_without_network() {
        let backend =
            OpenAiCompatibleBackend::new(BackendConfig::default()).unwrap();
        let request = CompletionRequest {
            system: "s".into(),
            user: "u".into(),
            max_tokens: 1,
        };
        assert!(matches!(
            backend.complete(&request),
            Err(GenerationError::MissingApiKey)
        ));
    }
}
