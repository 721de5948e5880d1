use thiserror::Error;

/// The full error taxonomy surfaced by the storage engine.
///
/// `NeedsSplit` from the allocator is deliberately not a variant here: it is
/// an internal-only sentinel handled locally by the B+-tree split logic and
/// must never escape to a caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid page id 0 passed to readPage")]
    InvalidPageId,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt page {page_id}: {reason}")]
    CorruptPage { page_id: u32, reason: String },

    #[error("duplicate key")]
    DuplicateKey,

    #[error("key not found")]
    NotFound,

    #[error("cell of {size} bytes exceeds max cell size {max}")]
    CellTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, StorageError>;
