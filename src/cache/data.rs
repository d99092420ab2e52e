use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::backend::BackendError;

/// Append-only file of block-sized payloads. Slot `s` lives at byte `s * block_size`.
pub struct DataFile {
    file: File,
    block_size: u64,
    // length in blocks; holding the lock is the right to append
    tail: Mutex<u64>,
}

impl DataFile {
    pub fn open(path: impl AsRef<Path>, block_size: u64) -> Result<Self, BackendError> {
        if block_size == 0 {
            return Err(BackendError::InvalidConfig("block size must not be zero".to_string()));
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        let aligned = len - len % block_size;
        if aligned != len {
            // an interrupted append; no index entry can point into it
            log::warn!(
                "cache data file {} ends with {} torn bytes, truncating to {}",
                path.as_ref().display(), len - aligned, aligned,
            );
            file.set_len(aligned)?;
            file.sync_all()?;
        }
        Ok(DataFile {
            file,
            block_size,
            tail: Mutex::new(aligned / block_size),
        })
    }

    /// Number of blocks stored.
    pub fn blocks(&self) -> Result<u64, BackendError> {
        Ok(*self.tail.lock().map_err(|_| BackendError::Poisoned)?)
    }

    /// Reads slot `slot` into `buffer`, which must be exactly one block long.
    pub fn read_block(&self, slot: u64, buffer: &mut [u8]) -> Result<(), BackendError> {
        debug_assert_eq!(buffer.len() as u64, self.block_size);
        let offset = slot * self.block_size;
        self.file.read_exact_at(buffer, offset).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => BackendError::IndexCorruption(format!(
                "slot {slot} lies beyond the end of the data file",
            )),
            _ => err.into(),
        })
    }

    /// Takes the append lock. Only one appender exists at a time.
    pub fn appender(&self) -> Result<DataAppender<'_>, BackendError> {
        let tail = self.tail.lock().map_err(|_| BackendError::Poisoned)?;
        Ok(DataAppender {
            file: &self.file,
            block_size: self.block_size,
            tail,
        })
    }
}

pub struct DataAppender<'a> {
    file: &'a File,
    block_size: u64,
    tail: MutexGuard<'a, u64>,
}

impl DataAppender<'_> {
    /// Appends whole blocks and returns the slot of the first one.
    pub fn append(&mut self, data: &[u8]) -> Result<u64, BackendError> {
        let length = data.len() as u64;
        if length % self.block_size != 0 {
            return Err(BackendError::InvalidAlignment {
                offset: *self.tail * self.block_size,
                length,
                block_size: self.block_size,
            });
        }
        let slot = *self.tail;
        self.file.write_all_at(data, slot * self.block_size)?;
        *self.tail += length / self.block_size;
        Ok(slot)
    }

    pub fn blocks(&self) -> u64 {
        *self.tail
    }

    pub fn sync(&self) -> Result<(), BackendError> {
        self.file.sync_data()?;
        Ok(())
    }
}
