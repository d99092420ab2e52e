use std::{io, sync::Arc};

pub mod range;
pub mod http;
pub mod file;
pub mod memory;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("Invalid range: offset {offset}, length {length}")]
    InvalidRange { offset: u64, length: u64 },
    #[error("Invalid alignment: offset {offset}, length {length}, block size {block_size}")]
    InvalidAlignment { offset: u64, length: u64, block_size: u64 },
    #[error("Out of bounds: block {block} of {block_count}")]
    OutOfBounds { block: u64, block_count: u64 },
    #[error("Size unavailable: {0}")]
    SizeUnavailable(String),
    #[error("Range unsupported: {0:?}")]
    RangeUnsupported(String),
    #[error("Corrupt response: {0}")]
    CorruptResponse(String),
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },
    #[error("Origin short read: expected {expected} bytes, got {actual}")]
    OriginShortRead { expected: u64, actual: u64 },
    #[error("Index corruption: {0}")]
    IndexCorruption(String),
    #[error("Index too large: {block_count} blocks")]
    IndexTooLarge { block_count: u64 },
    #[error("Origin of {size} bytes holds no block of {block_size} bytes")]
    OriginTooSmall { size: u64, block_size: u64 },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    IOError(#[from] io::Error),
    #[error("Poisoned lock")]
    Poisoned,
}

/// Capability consumed by a block-device protocol server.
///
/// Offsets and lengths are in bytes. Implementations must tolerate concurrent `read_at`
/// calls from several threads.
pub trait Backend: Send + Sync {
    /// Fills `buffer` from `offset` and returns the number of bytes read.
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError>;

    /// The exposed device is read-only; writes are accepted and dropped.
    fn write_at(&self, buffer: &[u8], offset: u64) -> Result<usize, BackendError>;

    fn size(&self) -> Result<u64, BackendError>;

    fn sync(&self) -> Result<(), BackendError>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        (**self).read_at(buffer, offset)
    }

    fn write_at(&self, buffer: &[u8], offset: u64) -> Result<usize, BackendError> {
        (**self).write_at(buffer, offset)
    }

    fn size(&self) -> Result<u64, BackendError> {
        (**self).size()
    }

    fn sync(&self) -> Result<(), BackendError> {
        (**self).sync()
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        (**self).read_at(buffer, offset)
    }

    fn write_at(&self, buffer: &[u8], offset: u64) -> Result<usize, BackendError> {
        (**self).write_at(buffer, offset)
    }

    fn size(&self) -> Result<u64, BackendError> {
        (**self).size()
    }

    fn sync(&self) -> Result<(), BackendError> {
        (**self).sync()
    }
}

impl<B: Backend + ?Sized> Backend for &B {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        (**self).read_at(buffer, offset)
    }

    fn write_at(&self, buffer: &[u8], offset: u64) -> Result<usize, BackendError> {
        (**self).write_at(buffer, offset)
    }

    fn size(&self) -> Result<u64, BackendError> {
        (**self).size()
    }

    fn sync(&self) -> Result<(), BackendError> {
        (**self).sync()
    }
}
