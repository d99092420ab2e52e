use std::ffi::OsString;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{Backend, BackendError};

pub mod index;
pub mod data;
pub mod metrics;

use data::DataFile;
use index::BlockIndex;
use metrics::CacheMetrics;

/// Default location of the index next to a cache data file: `<data>.idx`.
pub fn default_index_path(data_path: impl AsRef<Path>) -> PathBuf {
    let mut path = OsString::from(data_path.as_ref().as_os_str());
    path.push(".idx");
    PathBuf::from(path)
}

/// Maximal run of consecutive uncached blocks, fetched with one origin read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRun {
    pub block: u64,
    pub count: u64,
}

impl BlockRun {
    pub fn end(&self) -> u64 {
        self.block + self.count
    }
}

/// Merges ascending block numbers into runs of adjacent blocks.
pub fn coalesce(blocks: impl IntoIterator<Item = u64>) -> Vec<BlockRun> {
    let mut runs: Vec<BlockRun> = Vec::new();
    for block in blocks {
        match runs.last_mut() {
            Some(last) if last.end() == block => last.count += 1,
            _ => runs.push(BlockRun { block, count: 1 }),
        }
    }
    runs
}

/// Read-through block cache in front of an origin backend.
///
/// Blocks are fetched from the origin once, appended to the data file and recorded in the
/// index; later reads of the same blocks are served from the data file. Only block-aligned
/// reads are accepted.
pub struct BlockCache<Origin> {
    origin: Origin,
    block_size: u64,
    data: DataFile,
    index: BlockIndex,
    metrics: Arc<CacheMetrics>,
}

impl<Origin: Backend> BlockCache<Origin> {
    pub fn open(
        origin: Origin,
        data_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        block_size: u64,
    ) -> Result<Self, BackendError> {
        if block_size == 0 {
            return Err(BackendError::InvalidConfig("block size must not be zero".to_string()));
        }
        log::info!("cache init {}", data_path.as_ref().display());

        let data = DataFile::open(data_path, block_size)?;
        let size = origin.size()?;
        let block_count = size / block_size;
        if block_count == 0 {
            return Err(BackendError::OriginTooSmall { size, block_size });
        }
        if size % block_size != 0 {
            log::warn!("last {} bytes of the origin are not addressable in blocks of {}", size % block_size, block_size);
        }
        let index = BlockIndex::open(index_path, block_count)?;
        // a surviving index over a lost or replaced data file would serve other blocks' bytes
        let blocks = data.blocks()?;
        index.verify(blocks)?;
        log::info!("cache holds {} of {} blocks of {} bytes", blocks, block_count, block_size);

        Ok(BlockCache {
            origin,
            block_size,
            data,
            index,
            metrics: Arc::new(CacheMetrics::new()),
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.index.block_count()
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Checks that every index entry points inside the data file.
    pub fn verify(&self) -> Result<(), BackendError> {
        self.index.verify(self.data.blocks()?)
    }

    /// Byte range of `count` blocks from `block` in a buffer starting at block `first`.
    fn position(&self, first: u64, block: u64, count: u64) -> Range<usize> {
        let start = ((block - first) * self.block_size) as usize;
        start..start + (count * self.block_size) as usize
    }

    fn fill_from_cache(&self, first: u64, hits: &[(u64, u64)], buffer: &mut [u8]) -> Result<(), BackendError> {
        for &(block, slot) in hits {
            let position = self.position(first, block, 1);
            self.data.read_block(slot, &mut buffer[position])?;
        }
        Ok(())
    }

    fn read_blocks(&self, first: u64, count: u64, buffer: &mut [u8]) -> Result<(), BackendError> {
        self.metrics.record_access(count);

        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for (block, slot) in (first..first + count).zip(self.index.get_run(first, count)?) {
            match slot {
                Some(slot) => hits.push((block, slot)),
                None => misses.push(block),
            }
        }
        self.metrics.record_hits(hits.len() as u64);
        self.fill_from_cache(first, &hits, buffer)?;

        if misses.is_empty() {
            return Ok(());
        }
        self.fill_misses(first, &misses, buffer)
    }

    fn fill_misses(&self, first: u64, misses: &[u64], buffer: &mut [u8]) -> Result<(), BackendError> {
        let mut appender = self.data.appender()?;

        // another reader may have filled some of them while we waited for the lock
        let mut hits = Vec::new();
        let mut missing = Vec::new();
        for &block in misses {
            match self.index.get(block)? {
                Some(slot) => hits.push((block, slot)),
                None => missing.push(block),
            }
        }
        self.metrics.record_hits(hits.len() as u64);
        self.fill_from_cache(first, &hits, buffer)?;
        if missing.is_empty() {
            return Ok(());
        }

        let runs = coalesce(missing);
        for run in &runs {
            let position = self.position(first, run.block, run.count);
            let expected = run.count * self.block_size;
            let n = self.origin.read_at(&mut buffer[position], run.block * self.block_size)? as u64;
            if n != expected {
                return Err(BackendError::OriginShortRead { expected, actual: n });
            }
            log::debug!("fetched blocks {}..{} from origin", run.block, run.end());
        }

        // data first, index second; an index entry never outlives its data in a crash
        let mut slots = Vec::with_capacity(runs.len());
        for run in &runs {
            let position = self.position(first, run.block, run.count);
            slots.push(appender.append(&buffer[position])?);
        }
        appender.sync()?;
        for (run, slot) in runs.iter().zip(slots) {
            self.index.publish(run.block, slot, run.count)?;
        }
        self.index.flush()?;
        log::debug!("cached {} runs, data file holds {} blocks", runs.len(), appender.blocks());
        Ok(())
    }
}

impl<Origin: Backend> Backend for BlockCache<Origin> {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        let length = buffer.len() as u64;
        if offset % self.block_size != 0 || length % self.block_size != 0 {
            return Err(BackendError::InvalidAlignment {
                offset,
                length,
                block_size: self.block_size,
            });
        }
        let first = offset / self.block_size;
        let count = length / self.block_size;
        if count == 0 {
            return Ok(0);
        }
        let block_count = self.block_count();
        if first.checked_add(count).is_none_or(|end| end > block_count) {
            return Err(BackendError::OutOfBounds {
                block: first.max(block_count),
                block_count,
            });
        }

        let result = self.read_blocks(first, count, buffer);
        match &result {
            Ok(()) => log::trace!("read-at {:#x} size={:#x} => {:#x}", offset, length, length),
            Err(err) => log::trace!("read-at {:#x} size={:#x} => {}", offset, length, err),
        }
        result.map(|()| buffer.len())
    }

    fn write_at(&self, _buffer: &[u8], _offset: u64) -> Result<usize, BackendError> {
        Ok(0)
    }

    fn size(&self) -> Result<u64, BackendError> {
        self.origin.size()
    }

    fn sync(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
