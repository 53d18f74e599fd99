//! Library-wide error and result types.
//!
//! Every fallible operation returns a status from this one enum; nothing
//! panics across a module boundary. Variants are plain codes so callers
//! (and tests) can match on the exact failure; I/O details are logged at
//! the point where they are mapped.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MumError>;

/// All errors the library can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MumError {
    /// The input file could not be opened or read.
    #[error("could not open or read the input file")]
    FileIoInput,
    /// The output file could not be opened or written.
    #[error("could not open or write the output file")]
    FileIoOutput,
    /// Plaintext length exceeds the payload capacity of the block.
    #[error("plaintext length exceeds the block payload size")]
    InvalidEncryptSize,
    /// Encrypted input is not a whole number of encrypted blocks.
    #[error("encrypted length is not a multiple of the encrypted block size")]
    InvalidDecryptSize,
    /// The block-type bits of a decrypted frame do not match the engine.
    #[error("encrypted block carries a different block-type code")]
    InvalidEncryptedBlockBlocktype,
    /// The length field of a decrypted frame is larger than the payload.
    #[error("encrypted block length field is out of range")]
    InvalidEncryptedBlockLength,
    /// The checksum of a decrypted frame does not match its payload.
    #[error("encrypted block checksum mismatch")]
    InvalidEncryptedBlockChecksum,
    /// The key file could not be read.
    #[error("could not read the key file")]
    KeyfileRead,
    /// The key file holds fewer than 4096 bytes.
    #[error("key file is smaller than 4096 bytes")]
    KeyfileSmall,
    /// A data operation was attempted before `init_key`/`load_key`.
    #[error("key has not been initialized")]
    KeyNotInitialized,
    /// A file name does not carry a recognized `.mu1`-`.mu6` extension.
    #[error("file name does not end in a .mu1-.mu6 extension")]
    InvalidFileExtension,
    /// A subkey index of 560 or more was requested.
    #[error("subkey index is out of range")]
    SubkeyIndexOutOfRange,
    /// The multi-threaded engine was built with zero worker threads.
    #[error("multi-threaded engine has no worker threads")]
    MtRendererNoThreads,
}
