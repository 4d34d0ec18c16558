use crate::error::{RAGError, Result};
use jwalk::WalkDir;
use log::{debug, info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
};

const NOT_APPLICABLE: &str = "N/A";

/// Position of a document inside its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    /// 1-based page of a paged format.
    Number(u32),
    /// Flat formats have no pages.
    NotApplicable,
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Page::Number(n) => write!(f, "{n}"),
            Page::NotApplicable => f.write_str(NOT_APPLICABLE),
        }
    }
}

impl Serialize for Page {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Page::Number(n) => serializer.serialize_u32(*n),
            Page::NotApplicable => serializer.serialize_str(NOT_APPLICABLE),
        }
    }
}

impl<'de> Deserialize<'de> for Page {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Page::Number(n)),
            Repr::Text(s) if s == NOT_APPLICABLE => Ok(Page::NotApplicable),
            Repr::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a page number or \"{NOT_APPLICABLE}\", got \"{s}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub page: Page,
}

/// Text extracted from one text file or one PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Expands directories into the files below them. Plain paths are passed through
/// untouched, whether or not they exist; the loader reports the missing ones.
pub fn collect_files<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        if !path.is_dir() {
            files.push(path.to_path_buf());
            continue;
        }
        for entry in WalkDir::new(path).sort(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.path()),
                Ok(_) => {}
                Err(err) => {
                    // Log but don't fail on individual file errors
                    warn!("Failed to walk directory entry under {}: {}", path.display(), err);
                }
            }
        }
    }
    files
}

/// Loads every supported file into [`RawDocument`]s, in input order.
///
/// Files that cannot be loaded are logged and skipped. Fails with
/// [`RAGError::NoDocuments`] only when nothing at all could be loaded.
pub fn load_documents<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RawDocument>> {
    let files = collect_files(paths);

    let per_file: Vec<Vec<RawDocument>> = files
        .par_iter()
        .map(|path| match load_file(path) {
            Ok(docs) => {
                info!("Loaded {} page(s)/section(s) from {}", docs.len(), path.display());
                docs
            }
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                Vec::new()
            }
        })
        .collect();

    let documents: Vec<RawDocument> = per_file.into_iter().flatten().collect();
    if documents.is_empty() {
        return Err(RAGError::NoDocuments);
    }

    info!("Loaded {} documents from {} file(s)", documents.len(), files.len());
    Ok(documents)
}

/// Loads a single file, dispatching on its (case-insensitive) extension.
pub fn load_file(path: &Path) -> Result<Vec<RawDocument>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "pdf" => load_pdf(path),
        "txt" => load_text(path).map(|doc| vec![doc]),
        _ => Err(RAGError::UnsupportedExtension {
            path: path.to_path_buf(),
            extension,
        }),
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| RAGError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })
}

fn load_text(path: &Path) -> Result<RawDocument> {
    let bytes = read_bytes(path)?;
    let text = simdutf8::basic::from_utf8(&bytes).map_err(|e| RAGError::InvalidUtf8 {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(RawDocument {
        content: text.to_string(),
        metadata: DocumentMetadata {
            source: source_name(path),
            page: Page::NotApplicable,
        },
    })
}

fn load_pdf(path: &Path) -> Result<Vec<RawDocument>> {
    let bytes = read_bytes(path)?;
    let pdf_error = |message: String| RAGError::Pdf {
        path: path.to_path_buf(),
        message,
    };

    // pdf-extract panics on some malformed files instead of returning an error.
    let pages = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
    }))
    .map_err(|_| pdf_error("extractor panicked on malformed input".to_string()))?
    .map_err(|e| pdf_error(e.to_string()))?;

    debug!("Extracted {} page(s) from {}", pages.len(), path.display());

    let source = source_name(path);
    Ok(pages
        .into_iter()
        .zip(1u32..)
        .map(|(content, number)| RawDocument {
            content,
            metadata: DocumentMetadata {
                source: source.clone(),
                page: Page::Number(number),
            },
        })
        .collect())
}
