use std::fs::File;
use std::path::Path;
use std::sync::RwLock;

use memmap2::{MmapMut, MmapOptions};

use crate::backend::BackendError;

/// Width of one index entry in bytes.
pub const ENTRY_SIZE: u64 = 4;

/// Largest index file that can be mapped.
pub const MAX_INDEX_SIZE: u64 = i32::MAX as u64;

/// Memory-mapped block index: one big-endian `u32` per logical block.
///
/// Entry `0` marks an uncached block, entry `v` points at data file slot `v - 1`. Entries
/// are written once and never change afterwards.
pub struct BlockIndex {
    file: File,
    map: RwLock<MmapMut>,
    block_count: u64,
}

impl BlockIndex {
    pub fn open(path: impl AsRef<Path>, block_count: u64) -> Result<Self, BackendError> {
        let size = block_count
            .checked_mul(ENTRY_SIZE)
            .filter(|size| *size <= MAX_INDEX_SIZE)
            .ok_or(BackendError::IndexTooLarge { block_count })?;
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() != size {
            // grows with zeroes, or drops entries past the block count
            file.set_len(size)?;
        }
        let map = unsafe { MmapOptions::new().len(size as usize).map_mut(&file)? };
        Ok(BlockIndex {
            file,
            map: RwLock::new(map),
            block_count,
        })
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    fn entry_range(&self, block: u64) -> Result<std::ops::Range<usize>, BackendError> {
        if block >= self.block_count {
            return Err(BackendError::OutOfBounds {
                block,
                block_count: self.block_count,
            });
        }
        let start = (block * ENTRY_SIZE) as usize;
        Ok(start..start + ENTRY_SIZE as usize)
    }

    fn read_entry(map: &[u8], range: std::ops::Range<usize>) -> u32 {
        let mut bytes = [0u8; ENTRY_SIZE as usize];
        bytes.copy_from_slice(&map[range]);
        u32::from_be_bytes(bytes)
    }

    /// Data file slot of `block`, if cached.
    pub fn get(&self, block: u64) -> Result<Option<u64>, BackendError> {
        let range = self.entry_range(block)?;
        let map = self.map.read().map_err(|_| BackendError::Poisoned)?;
        let entry = Self::read_entry(&map, range);
        Ok(entry.checked_sub(1).map(u64::from))
    }

    /// Looks up `count` consecutive blocks under one lock.
    pub fn get_run(&self, first: u64, count: u64) -> Result<Vec<Option<u64>>, BackendError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let last = first.checked_add(count - 1).ok_or(BackendError::OutOfBounds {
            block: first,
            block_count: self.block_count,
        })?;
        self.entry_range(last)?;
        let map = self.map.read().map_err(|_| BackendError::Poisoned)?;
        (first..first + count)
            .map(|block| -> Result<Option<u64>, BackendError> {
                let range = self.entry_range(block)?;
                Ok(Self::read_entry(&map, range).checked_sub(1).map(u64::from))
            })
            .collect()
    }

    /// Points blocks `first..first + count` at consecutive slots starting at `first_slot`.
    ///
    /// The data for those slots must already be written to the data file.
    pub fn publish(&self, first: u64, first_slot: u64, count: u64) -> Result<(), BackendError> {
        let mut map = self.map.write().map_err(|_| BackendError::Poisoned)?;
        for i in 0..count {
            let block = first + i;
            let range = self.entry_range(block)?;
            let entry = u32::try_from(first_slot + i + 1)
                .map_err(|_| BackendError::IndexCorruption(format!("slot {} does not fit an index entry", first_slot + i)))?;
            let current = Self::read_entry(&map, range.clone());
            if current != 0 && current != entry {
                return Err(BackendError::IndexCorruption(format!(
                    "block {block} already maps to slot {}, refusing slot {}", current - 1, entry - 1,
                )));
            }
            map[range].copy_from_slice(&entry.to_be_bytes());
        }
        Ok(())
    }

    /// Flushes the mapping and the index file to durable storage.
    pub fn flush(&self) -> Result<(), BackendError> {
        {
            let map = self.map.read().map_err(|_| BackendError::Poisoned)?;
            map.flush()?;
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Checks every entry against the number of blocks held by the data file.
    pub fn verify(&self, data_blocks: u64) -> Result<(), BackendError> {
        let map = self.map.read().map_err(|_| BackendError::Poisoned)?;
        for (block, bytes) in map.chunks_exact(ENTRY_SIZE as usize).enumerate() {
            let entry = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if entry != 0 && u64::from(entry) > data_blocks {
                return Err(BackendError::IndexCorruption(format!(
                    "block {block} maps to slot {} but the data file holds {data_blocks} blocks", entry - 1,
                )));
            }
        }
        Ok(())
    }
}
