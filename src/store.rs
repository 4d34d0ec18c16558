//! Paired persistence of the vector index and its chunk list, plus the
//! load-or-create policy.
//!
//! The two artifacts are only meaningful together: row `i` of the index blob is the
//! embedding of element `i` of the chunk list. The chunk list is written first and
//! the index blob last. The blob header carries a fingerprint of everything that
//! went into it (embedding model, chunking parameters, input files) and the SHA-256
//! of the exact chunk list bytes written beside it. A persisted pair is reused only
//! when both match; otherwise both artifacts are rebuilt from scratch.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use lazy_static::lazy_static;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::chunking::{Chunk, Chunker};
use crate::config::RagConfig;
use crate::document::{collect_files, load_documents};
use crate::embedding::{Embed, embed_chunks};
use crate::error::{RAGError, Result};
use crate::indexing::{FlatIndex, Fingerprint, tmp_path};
use crate::retrieval::Retriever;

const FINGERPRINT_DOMAIN: &[u8] = b"legalrag-index-v1";

/// Hashes the embedding model, the chunking parameters and every input file
/// (base name and bytes, in input order). Unreadable files hash to a marker so
/// they still affect the result.
pub fn fingerprint_inputs<P: AsRef<Path>>(
    paths: &[P],
    chunker: &Chunker,
    model_id: &str,
) -> Fingerprint {
    let mut hash = Sha256::new();
    hash.update(FINGERPRINT_DOMAIN);
    hash.update((model_id.len() as u64).to_le_bytes());
    hash.update(model_id.as_bytes());
    hash.update((chunker.chunk_size() as u64).to_le_bytes());
    hash.update((chunker.chunk_overlap() as u64).to_le_bytes());

    for path in collect_files(paths) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        hash.update((name.len() as u64).to_le_bytes());
        hash.update(name.as_bytes());
        match fs::read(&path) {
            Ok(bytes) => {
                hash.update([1u8]);
                hash.update((bytes.len() as u64).to_le_bytes());
                hash.update(&bytes);
            }
            Err(_) => hash.update([0u8]),
        }
    }
    hash.finalize().into()
}

fn chunks_digest(json: &[u8]) -> Fingerprint {
    Sha256::digest(json).into()
}

pub fn fingerprint_hex(fingerprint: &Fingerprint) -> String {
    fingerprint.iter().map(|b| format!("{b:02x}")).collect()
}

/// Locations of the two paired artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStore {
    pub index_path: PathBuf,
    pub chunks_path: PathBuf,
}

impl IndexStore {
    pub fn new(index_path: impl Into<PathBuf>, chunks_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            chunks_path: chunks_path.into(),
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(&config.index_path, &config.chunks_path)
    }

    /// True only when both artifacts are present.
    pub fn exists(&self) -> bool {
        self.index_path.is_file() && self.chunks_path.is_file()
    }

    pub fn save(&self, index: &FlatIndex, chunks: &[Chunk]) -> Result<()> {
        if index.len() != chunks.len() {
            return Err(RAGError::IndexMismatch {
                vectors: index.len(),
                chunks: chunks.len(),
            });
        }

        let json =
            serde_json::to_vec_pretty(chunks).map_err(|e| RAGError::Serialization(e.to_string()))?;
        let digest = chunks_digest(&json);
        let tmp = tmp_path(&self.chunks_path);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.chunks_path)?;

        index.persist_paired(&self.index_path, &digest)?;
        info!(
            "Persisted {} vectors to {} and chunks to {}",
            index.len(),
            self.index_path.display(),
            self.chunks_path.display()
        );
        Ok(())
    }

    pub fn load_chunks(&self) -> Result<Vec<Chunk>> {
        let bytes = fs::read(&self.chunks_path)?;
        self.parse_chunks(&bytes)
    }

    fn parse_chunks(&self, bytes: &[u8]) -> Result<Vec<Chunk>> {
        serde_json::from_slice(bytes).map_err(|e| {
            RAGError::Deserialization(format!("{}: {e}", self.chunks_path.display()))
        })
    }

    /// Reads the chunk list only if it is the one `index` was written beside.
    fn load_paired_chunks(&self, index: &FlatIndex) -> Result<Option<Vec<Chunk>>> {
        let bytes = fs::read(&self.chunks_path)?;
        if &chunks_digest(&bytes) != index.chunks_digest() {
            return Ok(None);
        }
        self.parse_chunks(&bytes).map(Some)
    }

    /// Restores the pair, failing if the chunk list is not the one written with
    /// the index or the two disagree on length.
    pub fn load(&self) -> Result<(FlatIndex, Vec<Chunk>)> {
        let index = FlatIndex::restore(&self.index_path)?;
        let chunks = self
            .load_paired_chunks(&index)?
            .ok_or_else(|| RAGError::UnpairedArtifacts {
                index_path: self.index_path.clone(),
                chunks_path: self.chunks_path.clone(),
            })?;
        if index.len() != chunks.len() {
            return Err(RAGError::IndexMismatch {
                vectors: index.len(),
                chunks: chunks.len(),
            });
        }
        Ok((index, chunks))
    }
}

/// Restores the persisted pair when it matches the current inputs, otherwise
/// loads, chunks and embeds the documents and persists a fresh pair.
pub fn load_or_create<P: AsRef<Path>>(
    store: &IndexStore,
    paths: &[P],
    chunker: &Chunker,
    embedder: &dyn Embed,
) -> Result<Retriever> {
    let fingerprint = fingerprint_inputs(paths, chunker, embedder.model_id());
    load_or_create_with(store, paths, chunker, embedder, fingerprint)
}

fn load_or_create_with<P: AsRef<Path>>(
    store: &IndexStore,
    paths: &[P],
    chunker: &Chunker,
    embedder: &dyn Embed,
    fingerprint: Fingerprint,
) -> Result<Retriever> {
    if store.exists() {
        let index = FlatIndex::restore(&store.index_path)?;
        if index.fingerprint() != &fingerprint {
            warn!(
                "Index at {} was built from different inputs ({} != {}); rebuilding",
                store.index_path.display(),
                fingerprint_hex(index.fingerprint()),
                fingerprint_hex(&fingerprint)
            );
        } else if let Some(chunks) = store.load_paired_chunks(&index)? {
            info!(
                "Restored index with {} chunks from {}",
                chunks.len(),
                store.index_path.display()
            );
            return Retriever::new(index, chunks);
        } else {
            warn!(
                "Chunk list at {} does not belong to index {}; rebuilding",
                store.chunks_path.display(),
                store.index_path.display()
            );
        }
    } else {
        info!(
            "No persisted index at {}; building a new one",
            store.index_path.display()
        );
    }

    build(store, paths, chunker, embedder, fingerprint)
}

fn build<P: AsRef<Path>>(
    store: &IndexStore,
    paths: &[P],
    chunker: &Chunker,
    embedder: &dyn Embed,
    fingerprint: Fingerprint,
) -> Result<Retriever> {
    let documents = load_documents(paths)?;
    let chunks = chunker.chunk_all_documents(&documents);
    if chunks.is_empty() {
        warn!("Loaded {} documents but none contained text", documents.len());
        return Err(RAGError::NoDocuments);
    }

    let vectors = embed_chunks(embedder, &chunks)?;
    let index = FlatIndex::build(vectors)?.with_fingerprint(fingerprint);
    store.save(&index, &chunks)?;
    Retriever::new(index, chunks)
}

/// Build-once cache for retrievers, one entry per artifact pair. Calls touching
/// the same index or chunk list file are serialized, so two sessions never build
/// or write the same artifacts concurrently. An entry is replaced when its
/// fingerprint changes, so a superseded document set is dropped with it.
#[derive(Default)]
pub struct IndexCache {
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    retrievers: Mutex<HashMap<(PathBuf, PathBuf), (Fingerprint, Arc<Retriever>)>>,
}

lazy_static! {
    static ref GLOBAL_CACHE: Arc<IndexCache> = Arc::new(IndexCache::new());
}

/// Absolute path with the parent directory canonicalized, so `..` segments and
/// symlinked directories name one file one way. Falls back to the plain absolute
/// path when the directory does not exist yet.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(dir), Some(name)) => fs::canonicalize(dir)
            .map(|dir| dir.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used by [`crate::setup`].
    pub fn global() -> Arc<IndexCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Number of artifact pairs currently holding a retriever.
    pub fn len(&self) -> usize {
        self.retrievers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.path_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    pub fn load_or_create<P: AsRef<Path>>(
        &self,
        store: &IndexStore,
        paths: &[P],
        chunker: &Chunker,
        embedder: &dyn Embed,
    ) -> Result<Arc<Retriever>> {
        let key = (resolve(&store.index_path), resolve(&store.chunks_path));

        // Sorted acquisition keeps two stores that share a file from deadlocking.
        let mut lock_paths = vec![&key.0, &key.1];
        lock_paths.sort();
        lock_paths.dedup();
        let locks: Vec<_> = lock_paths.into_iter().map(|p| self.path_lock(p)).collect();
        let _guards: Vec<_> = locks
            .iter()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        let fingerprint = fingerprint_inputs(paths, chunker, embedder.model_id());
        if let Some((cached, retriever)) = self
            .retrievers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            if cached == &fingerprint {
                debug!("Reusing cached retriever for {}", key.0.display());
                return Ok(Arc::clone(retriever));
            }
        }

        let retriever = Arc::new(load_or_create_with(
            store,
            paths,
            chunker,
            embedder,
            fingerprint,
        )?);
        if let Some((_, superseded)) = self
            .retrievers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (fingerprint, Arc::clone(&retriever)))
        {
            debug!("Replaced cached retriever over {} chunks", superseded.len());
        }
        Ok(retriever)
    }
}
