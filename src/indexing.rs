use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::{ParallelSlice, ParallelSliceMut},
};

use crate::error::{RAGError, Result};

pub type Fingerprint = [u8; 32];

const MAGIC: &[u8; 4] = b"LRIX";
const FORMAT_VERSION: u32 = 2;
// magic + version + dimension + count + input fingerprint + chunk list digest
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 32 + 32;

/// One search hit. `position` is `None` for the end marker returned when the
/// index holds fewer than `k` vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32, // squared L2
    pub position: Option<usize>,
}

impl Neighbor {
    const SENTINEL: Neighbor = Neighbor {
        distance: f32::INFINITY,
        position: None,
    };
}

/// Exact nearest-neighbour index over squared L2 distance. Vectors live in one
/// contiguous row-major buffer; row `i` belongs to chunk `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimensions: usize,
    data: Vec<f32>,
    fingerprint: Fingerprint,
    chunks_digest: Fingerprint,
}

impl FlatIndex {
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if dimensions == 0 {
            return Err(RAGError::EmptyEmbeddings);
        }

        let mut data = Vec::with_capacity(vectors.len() * dimensions);
        for vector in vectors {
            if vector.len() != dimensions {
                return Err(RAGError::DimensionMismatch {
                    expected: dimensions,
                    got: vector.len(),
                });
            }
            data.extend(vector);
        }

        Ok(Self {
            dimensions,
            data,
            fingerprint: [0; 32],
            chunks_digest: [0; 32],
        })
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// SHA-256 of the serialized chunk list this blob was written next to.
    pub fn chunks_digest(&self) -> &Fingerprint {
        &self.chunks_digest
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.data
            .chunks_exact(self.dimensions)
            .nth(position)
    }

    /// Returns up to `k` neighbours by ascending distance, ties broken by
    /// position. When the index holds fewer than `k` vectors, a single sentinel
    /// entry follows the last real neighbour.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimensions {
            return Err(RAGError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimensions)
            .enumerate()
            .map(|(i, row)| Neighbor {
                distance: squared_l2(query, row),
                position: Some(i),
            })
            .collect();

        scored.par_sort_unstable_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        if k > scored.len() {
            scored.push(Neighbor::SENTINEL);
        } else {
            scored.truncate(k);
        }
        Ok(scored)
    }

    /// Writes the index to `path` through a temporary sibling file, so a reader
    /// never observes a partially written blob.
    pub fn persist(&self, path: &Path) -> Result<()> {
        self.persist_paired(path, &self.chunks_digest)
    }

    /// Like [`FlatIndex::persist`], recording `chunks_digest` as the chunk list
    /// this blob belongs to.
    pub fn persist_paired(&self, path: &Path, chunks_digest: &Fingerprint) -> Result<()> {
        let dimensions = u32::try_from(self.dimensions)
            .map_err(|_| RAGError::Serialization("dimension does not fit in u32".to_string()))?;
        let count = self.len() as u64;

        let tmp = tmp_path(path);
        let mut file = BufWriter::new(File::create(&tmp)?);
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        file.write_all(&dimensions.to_le_bytes())?;
        file.write_all(&count.to_le_bytes())?;
        file.write_all(&self.fingerprint)?;
        file.write_all(chunks_digest)?;
        for value in &self.data {
            file.write_all(&value.to_le_bytes())?;
        }
        file.into_inner()
            .map_err(|e| RAGError::Io(e.into_error()))?
            .sync_all()?;

        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn restore(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let corrupt = |reason: String| RAGError::CorruptIndex {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!("{} bytes is shorter than the header", bytes.len())));
        }
        if &bytes[0..4] != MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        let dimensions = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = u64::from_le_bytes(count_bytes) as usize;
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&bytes[20..52]);
        let mut chunks_digest = [0u8; 32];
        chunks_digest.copy_from_slice(&bytes[52..HEADER_LEN]);

        if dimensions == 0 || count == 0 {
            return Err(corrupt("index is empty".to_string()));
        }
        let expected_len = count
            .checked_mul(dimensions)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| corrupt("vector section length overflows".to_string()))?;
        if bytes.len() != expected_len {
            return Err(corrupt(format!(
                "expected {expected_len} bytes for {count} x {dimensions} vectors, found {}",
                bytes.len()
            )));
        }

        let mut data = Vec::with_capacity(count * dimensions);
        for raw in bytes[HEADER_LEN..].chunks_exact(4) {
            let value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            if !value.is_finite() {
                return Err(corrupt("vector contains non-finite values".to_string()));
            }
            data.push(value);
        }

        Ok(Self {
            dimensions,
            data,
            fingerprint,
            chunks_digest,
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
