use thiserror::Error;

use crate::PageId;

pub type Result<T> = std::result::Result<T, FlintError>;

/// Errors surfaced by the storage engine.
///
/// Programmer errors (an unknown frame id handed to the replacer, removing a
/// non-evictable frame) are not represented here; they panic at the call site.
#[derive(Debug, Error)]
pub enum FlintError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("all frames in the buffer pool are pinned")]
    NoFreeFrame,

    #[error("page allocation failed")]
    OutOfStorage,

    #[error("page {0} is pinned")]
    PagePinned(PageId),
}
