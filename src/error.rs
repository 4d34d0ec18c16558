use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RAGError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file at {path}: {source}")]
    FileRead { path: PathBuf, source: io::Error },

    #[error("Invalid UTF-8 in file {path}")]
    InvalidUtf8 {
        path: PathBuf,
        #[source]
        source: simdutf8::basic::Utf8Error,
    },

    #[error("Failed to extract text from PDF {path}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("Unsupported file extension '{extension}' for {path}")]
    UnsupportedExtension { path: PathBuf, extension: String },

    #[error("No documents could be loaded from the given paths")]
    NoDocuments,

    #[error("chunk_overlap ({overlap}) must be less than chunk_size ({size}) and chunk_size must be non-zero")]
    InvalidChunkConfig { size: usize, overlap: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Missing credential: {var} is not set. Export {var} or add `{var}=<your key>` to a .env file in the working directory"
    )]
    MissingCredential { var: &'static str },

    #[error("Embedding model initialization failed: {0}")]
    ModelInit(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    #[error("Empty embeddings vector")]
    EmptyEmbeddings,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Corrupt index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Index holds {vectors} vectors but the chunk list holds {chunks} chunks")]
    IndexMismatch { vectors: usize, chunks: usize },

    #[error("Chunk list {chunks_path} was not written together with index {index_path}")]
    UnpairedArtifacts {
        index_path: PathBuf,
        chunks_path: PathBuf,
    },

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Failures of the text-generation collaborator. These are recovered per question.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RAGError>;
