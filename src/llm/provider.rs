//! Provider-specific URL and authentication handling.
//!
//! All supported providers speak the Chat Completions wire format; they only
//! differ in where the endpoint lives and how the key is sent.

/// Default Azure `OpenAI` API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service, addressed by deployment rather than model.
    AzureOpenAI {
        deployment_name: String,
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Groq (groq.com)
    Groq,
    /// Any other OpenAI-compatible endpoint (vLLM, Ollama, DeepSeek, ...).
    Generic,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// Azure is detected with an empty deployment name; callers that know the
    /// deployment should construct [`Provider::AzureOpenAI`] directly.
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_ascii_lowercase();

        if lower.contains(".azure.com") {
            Self::AzureOpenAI {
                deployment_name: String::new(),
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            }
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Streaming chat completions URL for this provider.
    ///
    /// A `base_url` that already ends in `/v1` is not doubled.
    #[must_use]
    pub fn chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => format!(
                "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
            ),
            _ if base.ends_with("/v1") => format!("{base}/chat/completions"),
            _ => format!("{base}/v1/chat/completions"),
        }
    }

    /// Whether the key goes in an `api-key` header instead of `Authorization: Bearer`.
    #[must_use]
    pub fn uses_api_key_header(&self) -> bool {
        matches!(self, Self::AzureOpenAI { .. })
    }

    /// Whether the request body should carry the model name.
    #[must_use]
    pub fn sends_model(&self) -> bool {
        !matches!(self, Self::AzureOpenAI { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_known_hosts() {
        assert_eq!(Provider::detect_from_url("https://api.openai.com"), Provider::OpenAI);
        assert_eq!(Provider::detect_from_url("https://openrouter.ai/api"), Provider::OpenRouter);
        assert_eq!(Provider::detect_from_url("https://api.groq.com/openai"), Provider::Groq);
        assert_eq!(Provider::detect_from_url("http://localhost:11434"), Provider::Generic);
        assert!(matches!(
            Provider::detect_from_url("https://res.openai.azure.com"),
            Provider::AzureOpenAI { .. }
        ));
    }

    #[test]
    fn test_chat_url_does_not_double_version_segment() {
        let p = Provider::Generic;
        assert_eq!(p.chat_url("https://api.deepseek.com/"), "https://api.deepseek.com/v1/chat/completions");
        assert_eq!(p.chat_url("https://api.deepseek.com/v1"), "https://api.deepseek.com/v1/chat/completions");
    }

    #[test]
    fn test_azure_url_uses_deployment() {
        let p = Provider::AzureOpenAI {
            deployment_name: "codegen".into(),
            api_version: DEFAULT_AZURE_API_VERSION.into(),
        };
        assert_eq!(
            p.chat_url("https://res.openai.azure.com"),
            "https://res.openai.azure.com/openai/deployments/codegen/chat/completions?api-version=2024-08-01-preview"
        );
        assert!(p.uses_api_key_header());
        assert!(!p.sends_model());
    }
}
