//! Runtime configuration: defaults, a validating builder, and environment overrides.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::{RAGError, Result};
use crate::retrieval::DEFAULT_TOP_K;

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Process environment lookup used by the `*_from_env` readers.
pub fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn var_opt(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|s| !s.is_empty())
}

fn var_parse<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    var_opt(lookup, key)
        .map(|raw| {
            raw.parse()
                .map_err(|e| RAGError::Config(format!("{key}={raw:?} is invalid: {e}")))
        })
        .transpose()
}

/// Reads the generation API key through `lookup`. An unset or empty key is fatal
/// for setup and the error tells the user how to provide one.
pub fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    var_opt(&lookup, API_KEY_VAR).ok_or(RAGError::MissingCredential { var: API_KEY_VAR })
}

pub fn api_key_from_env() -> Result<String> {
    api_key_from(env_lookup)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks of one document.
    pub chunk_overlap: usize,
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Binary vector index blob.
    pub index_path: PathBuf,
    /// JSON chunk list paired with `index_path`.
    pub chunks_path: PathBuf,
    pub generation_model: String,
    pub api_base: String,
    pub request_timeout_secs: u64,
    /// Where the embedding model is downloaded; fastembed's default when unset.
    pub model_cache_dir: Option<PathBuf>,
    /// Keep only the most recent N turns. `None` keeps the whole conversation.
    pub history_limit: Option<usize>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            index_path: PathBuf::from("vector_index.bin"),
            chunks_path: PathBuf::from("chunks.json"),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: 120,
            model_cache_dir: None,
            history_limit: None,
        }
    }
}

impl RagConfig {
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Defaults overridden by `LEGALRAG_*` variables, after loading `.env`.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Self::from_lookup(env_lookup)
    }

    /// Defaults overridden by whatever `lookup` returns for the `LEGALRAG_*`
    /// names. A value that does not parse is a [`RAGError::Config`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
        let defaults = RagConfig::default();

        let mut builder = RagConfig::builder()
            .chunk_size(var_parse(lookup, "LEGALRAG_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size))
            .chunk_overlap(
                var_parse(lookup, "LEGALRAG_CHUNK_OVERLAP")?.unwrap_or(defaults.chunk_overlap),
            )
            .top_k(var_parse(lookup, "LEGALRAG_TOP_K")?.unwrap_or(defaults.top_k))
            .index_path(
                var_opt(lookup, "LEGALRAG_INDEX_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.index_path),
            )
            .chunks_path(
                var_opt(lookup, "LEGALRAG_CHUNKS_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.chunks_path),
            )
            .generation_model(var_opt(lookup, "LEGALRAG_MODEL").unwrap_or(defaults.generation_model))
            .api_base(var_opt(lookup, "LEGALRAG_API_BASE").unwrap_or(defaults.api_base))
            .request_timeout_secs(
                var_parse(lookup, "LEGALRAG_REQUEST_TIMEOUT_SECS")?
                    .unwrap_or(defaults.request_timeout_secs),
            );

        if let Some(dir) = var_opt(lookup, "LEGALRAG_MODEL_CACHE") {
            builder = builder.model_cache_dir(dir);
        }
        if let Some(limit) = var_parse(lookup, "LEGALRAG_HISTORY_LIMIT")? {
            builder = builder.history_limit(limit);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_path = path.into();
        self
    }

    pub fn chunks_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chunks_path = path.into();
        self
    }

    pub fn generation_model(mut self, model: impl Into<String>) -> Self {
        self.config.generation_model = model.into();
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn model_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_cache_dir = Some(dir.into());
        self
    }

    pub fn history_limit(mut self, turns: usize) -> Self {
        self.config.history_limit = Some(turns);
        self
    }

    /// # Errors
    ///
    /// Returns [`RAGError::InvalidChunkConfig`] if `chunk_overlap >= chunk_size`,
    /// and [`RAGError::Config`] for a zero `top_k`, a zero `history_limit` or
    /// identical artifact paths.
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(RAGError::InvalidChunkConfig {
                size: config.chunk_size,
                overlap: config.chunk_overlap,
            });
        }
        if config.top_k == 0 {
            return Err(RAGError::Config("top_k must be greater than zero".to_string()));
        }
        if config.history_limit == Some(0) {
            return Err(RAGError::Config(
                "history_limit must be greater than zero when set".to_string(),
            ));
        }
        if config.index_path == config.chunks_path {
            return Err(RAGError::Config(format!(
                "index_path and chunks_path must differ (both are {})",
                config.index_path.display()
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RagConfig::builder().build().unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.generation_model, "gemini-2.5-flash");
        assert_eq!(config.history_limit, None);
    }

    #[test]
    fn builder_rejects_inconsistent_values() {
        assert!(matches!(
            RagConfig::builder().chunk_size(100).chunk_overlap(100).build(),
            Err(RAGError::InvalidChunkConfig { size: 100, overlap: 100 })
        ));
        assert!(matches!(RagConfig::builder().top_k(0).build(), Err(RAGError::Config(_))));
        assert!(matches!(
            RagConfig::builder().index_path("a").chunks_path("a").build(),
            Err(RAGError::Config(_))
        ));
    }

    fn vars(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn missing_credential_carries_remediation() {
        for lookup in [vars(&[]), vars(&[("GEMINI_API_KEY", "")])] {
            let err = api_key_from(lookup).unwrap_err();
            assert!(matches!(err, RAGError::MissingCredential { var: "GEMINI_API_KEY" }));
            let message = err.to_string();
            assert!(message.contains("GEMINI_API_KEY"));
            assert!(message.contains(".env"));
        }
        assert_eq!(api_key_from(vars(&[("GEMINI_API_KEY", "k-123")])).unwrap(), "k-123");
    }

    #[test]
    fn overrides_apply_and_empty_values_are_ignored() {
        let config = RagConfig::from_lookup(vars(&[
            ("LEGALRAG_CHUNK_SIZE", "500"),
            ("LEGALRAG_CHUNK_OVERLAP", "50"),
            ("LEGALRAG_HISTORY_LIMIT", "4"),
            ("LEGALRAG_MODEL", ""),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.history_limit, Some(4));
        assert_eq!(config.generation_model, "gemini-2.5-flash");
    }

    #[test]
    fn unparseable_override_names_the_variable() {
        let err = RagConfig::from_lookup(vars(&[("LEGALRAG_CHUNK_SIZE", "1k")])).unwrap_err();
        match err {
            RAGError::Config(message) => assert!(message.contains("LEGALRAG_CHUNK_SIZE")),
            other => panic!("expected a config error, got {other:?}"),
        }
        assert!(matches!(
            RagConfig::from_lookup(vars(&[("LEGALRAG_TOP_K", "-3")])),
            Err(RAGError::Config(_))
        ));
    }
}
