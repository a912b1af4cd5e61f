use anyhow::{Context, Result};
use browser::BrowserOptions;
use search::{DedupPolicy, ResponseMode};
use serde::{Deserialize, Serialize};
use sources::SiteTimeouts;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub webdriver: BrowserOptions,
    pub search: SearchConfig,
    pub relevance: RelevanceConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub mode: ResponseMode,
    pub dedup: DedupPolicy,
    /// `None` lets a source run as long as its own waits allow.
    pub source_deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    pub threshold: f32,
    pub concurrency: usize,
    pub backend: EmbeddingBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Relevance mode is unavailable.
    Disabled,
    Ollama {
        base_url: String,
        model: String,
        timeout_secs: u64,
    },
    OpenAi {
        base_url: String,
        model: String,
        #[serde(skip_serializing, default)]
        api_key: String,
        dimensions: Option<usize>,
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub linkedin: SiteTimeouts,
    pub glassdoor: SiteTimeouts,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            webdriver: BrowserOptions::default(),
            search: SearchConfig {
                mode: ResponseMode::All,
                dedup: DedupPolicy::Keep,
                source_deadline_secs: Some(600),
            },
            relevance: RelevanceConfig {
                threshold: 0.5,
                concurrency: 4,
                backend: EmbeddingBackend::Ollama {
                    base_url: "http://localhost:11434".to_string(),
                    model: "all-minilm".to_string(),
                    timeout_secs: 30,
                },
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 4000,
            },
            timeouts: TimeoutsConfig {
                linkedin: SiteTimeouts::linkedin(),
                glassdoor: SiteTimeouts::glassdoor(),
            },
        }
    }
}

impl AppConfig {
    /// Defaults overridden by environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.server.host = host;
        }
        if let Some(port) = parsed(&lookup, "PORT")? {
            config.server.port = port;
        }

        if let Some(url) = lookup("WEBDRIVER_URL") {
            config.webdriver.webdriver_url = url;
        }
        if let Some(headless) = parsed(&lookup, "HEADLESS")? {
            config.webdriver.headless = headless;
        }
        if let Some(agent) = lookup("USER_AGENT") {
            config.webdriver.user_agent = agent;
        }
        if let Some(args) = lookup("BROWSER_ARGS") {
            config.webdriver.extra_args = args
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }

        if let Some(mode) = lookup("SEARCH_MODE") {
            config.search.mode = mode
                .parse()
                .map_err(|e| anyhow::anyhow!("SEARCH_MODE: {e}"))?;
        }
        if let Some(dedup) = lookup("DEDUP_POLICY") {
            config.search.dedup = match dedup.trim().to_ascii_lowercase().as_str() {
                "keep" => DedupPolicy::Keep,
                "apply_link" => DedupPolicy::ApplyLink,
                other => anyhow::bail!("DEDUP_POLICY must be 'keep' or 'apply_link', got '{other}'"),
            };
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "SOURCE_DEADLINE_SECS")? {
            // 0 disables the deadline
            config.search.source_deadline_secs = (secs > 0).then_some(secs);
        }

        if let Some(threshold) = parsed(&lookup, "RELEVANCE_THRESHOLD")? {
            config.relevance.threshold = threshold;
        }
        if let Some(concurrency) = parsed(&lookup, "RELEVANCE_CONCURRENCY")? {
            config.relevance.concurrency = concurrency;
        }
        config.relevance.backend = backend_from(&lookup, config.relevance.backend)?;

        if let Some(retries) = parsed(&lookup, "LOCATION_LOOKUP_RETRIES")? {
            config.retry.max_retries = retries;
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn backend_from<F>(lookup: &F, current: EmbeddingBackend) -> Result<EmbeddingBackend>
where
    F: Fn(&str) -> Option<String>,
{
    let kind = lookup("EMBEDDING_BACKEND").map(|k| k.trim().to_ascii_lowercase());
    let timeout_secs = parsed(lookup, "EMBEDDING_TIMEOUT_SECS")?.unwrap_or(30);

    match kind.as_deref() {
        None => Ok(match current {
            EmbeddingBackend::Ollama { base_url, model, .. } => EmbeddingBackend::Ollama {
                base_url: lookup("OLLAMA_URL").unwrap_or(base_url),
                model: lookup("OLLAMA_EMBEDDING_MODEL").unwrap_or(model),
                timeout_secs,
            },
            other => other,
        }),
        Some("none") | Some("disabled") => Ok(EmbeddingBackend::Disabled),
        Some("ollama") => Ok(EmbeddingBackend::Ollama {
            base_url: lookup("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: lookup("OLLAMA_EMBEDDING_MODEL").unwrap_or_else(|| "all-minilm".to_string()),
            timeout_secs,
        }),
        Some("openai") => Ok(EmbeddingBackend::OpenAi {
            base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: lookup("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            api_key: lookup("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set when EMBEDDING_BACKEND=openai")?,
            dimensions: parsed(lookup, "OPENAI_EMBEDDING_DIMENSIONS")?,
            timeout_secs,
        }),
        Some(other) => anyhow::bail!(
            "EMBEDDING_BACKEND must be 'ollama', 'openai' or 'none', got '{other}'"
        ),
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.search.mode, ResponseMode::All);
        assert_eq!(config.search.source_deadline_secs, Some(600));
        assert_eq!(config.relevance.threshold, 0.5);
        assert_eq!(config.webdriver.webdriver_url, "http://localhost:9515");
        assert!(matches!(config.relevance.backend, EmbeddingBackend::Ollama { .. }));
    }

    #[test]
    fn test_overrides() {
        let config = config_with(&[
            ("PORT", "9000"),
            ("HEADLESS", "true"),
            ("SEARCH_MODE", "relevant"),
            ("DEDUP_POLICY", "apply_link"),
            ("SOURCE_DEADLINE_SECS", "0"),
            ("RELEVANCE_THRESHOLD", "0.65"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.webdriver.headless);
        assert_eq!(config.search.mode, ResponseMode::Relevant);
        assert_eq!(config.search.dedup, DedupPolicy::ApplyLink);
        assert_eq!(config.search.source_deadline_secs, None);
        assert_eq!(config.relevance.threshold, 0.65);
    }

    #[test]
    fn test_openai_backend_requires_key() {
        let err = config_with(&[("EMBEDDING_BACKEND", "openai")]).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let config = config_with(&[("EMBEDDING_BACKEND", "openai"), ("OPENAI_API_KEY", "sk-test")])
            .unwrap();
        match config.relevance.backend {
            EmbeddingBackend::OpenAi { model, api_key, .. } => {
                assert_eq!(model, "text-embedding-3-small");
                assert_eq!(api_key, "sk-test");
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn test_invalid_values_are_reported() {
        assert!(config_with(&[("PORT", "eighty")]).is_err());
        assert!(config_with(&[("SEARCH_MODE", "ranked")]).is_err());
        assert!(config_with(&[("EMBEDDING_BACKEND", "bert")]).is_err());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = config_with(&[("EMBEDDING_BACKEND", "openai"), ("OPENAI_API_KEY", "sk-secret")])
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
