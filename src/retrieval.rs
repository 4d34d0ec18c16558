use crate::chunking::Chunk;
use crate::error::{RAGError, Result};
use crate::indexing::FlatIndex;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk<'a> {
    pub distance: f32,
    pub position: usize,
    pub chunk: &'a Chunk,
}

/// A vector index paired with the chunks it was built from. Row `i` of the index
/// is the embedding of `chunks[i]`; construction refuses any other shape.
#[derive(Debug)]
pub struct Retriever {
    index: FlatIndex,
    chunks: Vec<Chunk>,
}

impl Retriever {
    pub fn new(index: FlatIndex, chunks: Vec<Chunk>) -> Result<Self> {
        if index.len() != chunks.len() {
            return Err(RAGError::IndexMismatch {
                vectors: index.len(),
                chunks: chunks.len(),
            });
        }
        Ok(Self { index, chunks })
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Nearest chunks with their distances, best first. Sentinel and out-of-range
    /// positions from the index are dropped, so the result may be shorter than `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk<'_>>> {
        let neighbors = self.index.search(query, k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                let position = n.position?;
                self.chunks.get(position).map(|chunk| ScoredChunk {
                    distance: n.distance,
                    position,
                    chunk,
                })
            })
            .collect())
    }

    /// The top `k` chunks for `query`, best match first. Duplicate texts from
    /// overlapping windows are returned as-is.
    pub fn retrieve(&self, query: &[f32], k: usize) -> Result<Vec<&Chunk>> {
        Ok(self
            .search(query, k)?
            .into_iter()
            .map(|scored| scored.chunk)
            .collect())
    }
}
