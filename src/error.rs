use thiserror::Error;

/// Errors that can occur during storage operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API. Configuration errors (`DuplicateSection`, `BackupWithoutCrc`,
/// `SizeMismatch`, `SectionNotFound`, `InsufficientCapacity`) never touch the device. A caller would
/// usually only need to handle `CorruptedData` by falling back to in-memory defaults.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The internal error value is returned from the provided device. The storage refuses further
    /// writes until it is rebuilt.
    #[error("internal device error")]
    DeviceError,

    /// A section with the same id was already registered.
    #[error("section already registered")]
    DuplicateSection,

    /// A backup copy can only be told apart from a damaged primary if both carry a CRC.
    #[error("backup copy requires crc")]
    BackupWithoutCrc,

    /// The section footprint (data, trailers and backup) exceeds the 32-bit address space.
    #[error("invalid section range")]
    InvalidSectionRange,

    /// No section with the given id was registered.
    #[error("section not found")]
    SectionNotFound,

    /// The buffer length differs from the registered section size.
    #[error("size mismatch")]
    SizeMismatch,

    /// Neither the primary nor the backup copy passed the CRC check.
    #[error("corrupted data")]
    CorruptedData,

    /// The storage preamble carries a version this library can't handle.
    #[error("unsupported storage version: {0}")]
    UnsupportedVersion(u16),

    /// The reserved region can't hold the state log (or is too large for its 16-bit size field).
    #[error("insufficient capacity")]
    InsufficientCapacity,

    /// The serialized element state doesn't match the size fixed by the first write.
    /// Changing the element set requires erasing the state storage.
    #[error("state size mismatch")]
    StateSizeMismatch,

    /// The reserved region holds a section of another type. The raw type byte is reported.
    #[error("section type mismatch: {0}")]
    SectionTypeMismatch(u8),
}
