use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::document::{DocumentMetadata, RawDocument};
use crate::error::{RAGError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// A window of document text, the unit of both indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "chunk_content")]
    pub content: String, // at most chunk_size characters
    pub metadata: DocumentMetadata, // owned copy of the source document's metadata
}

/// Fixed-width sliding window over characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(RAGError::InvalidChunkConfig {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Distance between consecutive window starts; always at least 1.
    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Chunks every document independently; output keeps document order.
    pub fn chunk_all_documents(&self, docs: &[RawDocument]) -> Vec<Chunk> {
        let doc_chunks_vec: Vec<Vec<Chunk>> =
            docs.par_iter().map(|doc| self.chunk_document(doc)).collect();

        let mut all_chunks =
            Vec::with_capacity(doc_chunks_vec.iter().map(|v| v.len()).sum::<usize>());
        for mut v in doc_chunks_vec {
            all_chunks.append(&mut v);
        }

        log::info!(
            "Split {} documents into {} chunks (size {}, overlap {})",
            docs.len(),
            all_chunks.len(),
            self.chunk_size,
            self.chunk_overlap
        );
        all_chunks
    }

    pub fn chunk_document(&self, doc: &RawDocument) -> Vec<Chunk> {
        self.windows(&doc.content)
            .into_iter()
            .map(|text| Chunk {
                content: text.to_string(),
                metadata: doc.metadata.clone(),
            })
            .collect()
    }

    /// Splits `text` into windows of at most `chunk_size` characters. Window starts
    /// advance by [`Chunker::step`] until one would begin at or past the end.
    pub fn windows<'a>(&self, text: &'a str) -> Vec<&'a str> {
        // Byte offset of every char boundary, including the end of the string, so
        // windows are counted in characters and never split a code point.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = boundaries.len() - 1;

        let mut windows = Vec::with_capacity(char_count / self.step() + 1);
        let mut start = 0;
        while start < char_count {
            let end = (start + self.chunk_size).min(char_count);
            windows.push(&text[boundaries[start]..boundaries[end]]);
            start += self.step();
        }
        windows
    }
}
