//! Sentence embeddings shared by index building and querying.
//!
//! Both sides of retrieval must run the same model with the same configuration,
//! otherwise distances between query and chunk vectors are meaningless. The model id
//! is therefore part of the index fingerprint (see [`crate::store`]).

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::chunking::Chunk;
use crate::error::{RAGError, Result};

pub const MODEL_ID: &str = "sentence-transformers/paraphrase-multilingual-mpnet-base-v2";
pub const MODEL_DIMENSIONS: usize = 768;

const EMBED_BATCH_SIZE: usize = 32;

/// Maps text to fixed-dimension vectors. Calls are stateless.
pub trait Embed: Send + Sync {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    /// Identifies model and configuration; two embedders with the same id must
    /// produce interchangeable vectors.
    fn model_id(&self) -> &str;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text])?
            .into_iter()
            .next()
            .ok_or(RAGError::EmptyEmbeddings)
    }
}

/// The multilingual fastembed model. Inference needs `&mut`, so the session is
/// kept behind a mutex and the embedder itself can be shared through an `Arc`.
pub struct Embedder {
    model: Mutex<TextEmbedding>,
}

impl Embedder {
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        info!("Initializing embedding model {MODEL_ID}");

        let mut options =
            InitOptions::new(EmbeddingModel::ParaphraseMLMpnetBaseV2).with_show_download_progress(true);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }

        let model = TextEmbedding::try_new(options).map_err(|e| RAGError::ModelInit(e.to_string()))?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embed for Embedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| RAGError::Embedding("embedding model lock poisoned".to_string()))?;
        model
            .embed(texts.to_vec(), Some(EMBED_BATCH_SIZE))
            .map_err(|e| RAGError::Embedding(e.to_string()))
    }

    fn dimensions(&self) -> usize {
        MODEL_DIMENSIONS
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

/// Embeds chunk contents in batches, reporting progress, and checks that every
/// vector has the embedder's dimension. Output is position-aligned with `chunks`.
pub fn embed_chunks(embedder: &dyn Embed, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
    let progress = ProgressBar::new(chunks.len() as u64);
    if let Ok(style) =
        ProgressStyle::with_template("embedding [{bar:40}] {pos}/{len} chunks ({eta})")
    {
        progress.set_style(style.progress_chars("=> "));
    }

    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
        let embedded = embedder.embed(&texts)?;
        if embedded.len() != batch.len() {
            progress.abandon();
            return Err(RAGError::Embedding(format!(
                "expected {} vectors, model returned {}",
                batch.len(),
                embedded.len()
            )));
        }
        for vector in &embedded {
            if vector.len() != embedder.dimensions() {
                progress.abandon();
                return Err(RAGError::DimensionMismatch {
                    expected: embedder.dimensions(),
                    got: vector.len(),
                });
            }
        }
        vectors.extend(embedded);
        progress.inc(batch.len() as u64);
    }
    progress.finish_and_clear();

    debug!("Embedded {} chunks with {}", vectors.len(), embedder.model_id());
    Ok(vectors)
}
