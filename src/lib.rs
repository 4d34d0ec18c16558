//! Retrieval-augmented question answering over a session's legal documents.
//!
//! Build time: [`document`] → [`chunking`] → [`embedding`] → [`indexing`], persisted
//! and reused through [`store`]. Query time: [`embedding`] → [`retrieval`] →
//! [`chat`] → [`generation`].
//!
//! ```rust,ignore
//! let mut chatbot = legalrag::setup(&["lease_agreement.pdf", "notes.txt"])?;
//! let answer = chatbot.ask("What is the notice period for termination?");
//! println!("{}\n\nSources: {}", answer.answer, answer.citations);
//! ```

pub mod chat;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod indexing;
pub mod retrieval;
pub mod store;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use chat::{Answer, RagChatbot, Turn};
pub use chunking::{Chunk, Chunker};
pub use config::RagConfig;
pub use document::{DocumentMetadata, Page, RawDocument};
pub use embedding::{Embed, Embedder};
pub use error::{GenerationError, RAGError, Result};
pub use generation::{GeminiGenerator, GenerationRequest, Generator};
pub use indexing::FlatIndex;
pub use retrieval::Retriever;
pub use store::{IndexCache, IndexStore};

/// Resources shared by every session: configuration, the embedding model, the
/// generation client and the index cache.
pub struct Engine {
    config: RagConfig,
    embedder: Arc<dyn Embed>,
    generator: Arc<dyn Generator>,
    cache: Arc<IndexCache>,
}

impl Engine {
    /// Wires explicit components together with a private index cache.
    pub fn new(config: RagConfig, embedder: Arc<dyn Embed>, generator: Arc<dyn Generator>) -> Self {
        Self {
            config,
            embedder,
            generator,
            cache: Arc::new(IndexCache::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<IndexCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Production wiring from the environment: `.env` + `LEGALRAG_*` settings,
    /// `GEMINI_API_KEY`, the fastembed model and the Gemini client.
    ///
    /// # Errors
    ///
    /// [`RAGError::MissingCredential`] when the API key is absent, and
    /// [`RAGError::ModelInit`] when the embedding model cannot be loaded.
    pub fn from_env() -> Result<Self> {
        config::load_dotenv();
        Self::from_lookup(config::env_lookup)
    }

    /// [`Engine::from_env`] with variables read through `lookup`. The credential is
    /// checked before the embedding model is loaded.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = RagConfig::from_lookup(&lookup)?;
        let api_key = config::api_key_from(&lookup)?;

        let generator = GeminiGenerator::new(
            api_key,
            config.api_base.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let embedder = Embedder::new(config.model_cache_dir.clone())?;

        Ok(Self::new(config, Arc::new(embedder), Arc::new(generator)))
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Loads or builds the index for `file_paths` and opens a new session on it.
    pub fn setup<P: AsRef<Path>>(&self, file_paths: &[P]) -> Result<RagChatbot> {
        let chunker = Chunker::new(self.config.chunk_size, self.config.chunk_overlap)?;
        let store = IndexStore::from_config(&self.config);
        let retriever =
            self.cache
                .load_or_create(&store, file_paths, &chunker, self.embedder.as_ref())?;

        log::info!("Chatbot ready over {} chunks", retriever.len());
        Ok(RagChatbot::new(
            retriever,
            Arc::clone(&self.embedder),
            Arc::clone(&self.generator),
            self.config.generation_model.clone(),
        )
        .with_top_k(self.config.top_k)
        .with_history_limit(self.config.history_limit))
    }
}

/// Opens a session over `file_paths` using the environment configuration and the
/// process-wide index cache.
pub fn setup<P: AsRef<Path>>(file_paths: &[P]) -> Result<RagChatbot> {
    Engine::from_env()
        .and_then(|engine| engine.with_cache(IndexCache::global()).setup(file_paths))
        .map_err(|err| {
            log::error!("Chatbot initialization failed: {err}");
            err
        })
}
