use thiserror::Error;

/// Errors that can occur while creating, loading or inspecting an image.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("storage error: {0}")]
    StorageError(#[from] supla_storage::error::Error),

    #[error("image size {0} is too small")]
    ImageTooSmall(usize),

    #[error("no storage preamble at offset {0:#x}")]
    NotFormatted(u32),

    #[error("access out of bounds at {offset:#x}[{len}]")]
    OutOfBounds { offset: u32, len: usize },
}
