use std::sync::atomic::{AtomicU64, Ordering};

use super::{Backend, BackendError, range::{RangeRequest, RangeUnit}};

/// Origin serving an in-memory buffer; counts the reads it answered.
#[derive(Debug)]
pub struct MemoryBackend<Buffer> {
    buffer: Buffer,
    reads: AtomicU64,
}

impl<Buffer: AsRef<[u8]>> MemoryBackend<Buffer> {
    pub fn new(buffer: Buffer) -> Self {
        MemoryBackend {
            buffer,
            reads: AtomicU64::new(0),
        }
    }

    /// Number of `read_at` calls that reached the buffer.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }
}

impl<Buffer: AsRef<[u8]> + Send + Sync> Backend for MemoryBackend<Buffer> {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        let request = RangeRequest::new(RangeUnit::Bytes, offset, buffer.len() as u64)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let data = self.buffer.as_ref();
        if request.start >= data.len() as u64 {
            return Ok(0);
        }
        let start = request.start as usize;
        let end = (request.end as usize).min(data.len() - 1);
        let n = end - start + 1;
        buffer[..n].copy_from_slice(&data[start..=end]);
        log::trace!("read-at {:#x} size={:#x} => {:#x}", offset, buffer.len(), n);
        Ok(n)
    }

    fn write_at(&self, _buffer: &[u8], _offset: u64) -> Result<usize, BackendError> {
        Ok(0)
    }

    fn size(&self) -> Result<u64, BackendError> {
        Ok(self.buffer.as_ref().len() as u64)
    }

    fn sync(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
