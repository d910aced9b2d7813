use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to load document: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector index has no live entries; build one with `ragdesk build <docs-dir> --rebuild`")]
    EmptyIndex,

    #[error("Corrupt or incompatible index snapshot: {0}; rebuild with `ragdesk build <docs-dir> --rebuild`")]
    CorruptIndex(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Concurrent transition detected for ticket {0}")]
    TicketConflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Process exit code for this failure kind, used by the CLI.
    #[inline]
    pub fn exit_code(&self) -> i32 {
        match *self {
            RagError::InvalidConfig(_) => 2,
            RagError::UnsupportedFormat(_) | RagError::Load(_) => 3,
            RagError::EmptyIndex | RagError::CorruptIndex(_) => 4,
            RagError::Embedding(_) => 5,
            RagError::Generation(_) | RagError::Classification(_) => 6,
            RagError::TicketConflict(_) => 7,
            RagError::Io(_) | RagError::Other(_) => 1,
        }
    }
}

pub mod chunking;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod indexer;
pub mod loader;
pub mod retriever;
pub mod synthesis;
pub mod tickets;
