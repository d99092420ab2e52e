use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::{Backend, BackendError, range::{RangeRequest, RangeUnit}};

/// Origin backed by a local file, read with positional reads so that concurrent
/// requests never share a cursor.
pub struct FileBackend {
    file: File,
}

impl FileBackend {
    pub fn new(file: File) -> Self {
        FileBackend { file }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl Backend for FileBackend {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        let request = RangeRequest::new(RangeUnit::Bytes, offset, buffer.len() as u64)?;
        let mut filled = 0;
        while filled < buffer.len() {
            match self.file.read_at(&mut buffer[filled..], request.start + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        log::trace!("read-at {:#x} size={:#x} => {:#x}", offset, buffer.len(), filled);
        Ok(filled)
    }

    fn write_at(&self, _buffer: &[u8], _offset: u64) -> Result<usize, BackendError> {
        Ok(0)
    }

    fn size(&self) -> Result<u64, BackendError> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_backend() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let backend = FileBackend::open(temp_file.path()).unwrap();
        assert_eq!(backend.size().unwrap(), 1024);

        let mut buffer = vec![0u8; 256];
        assert_eq!(backend.read_at(&mut buffer, 512).unwrap(), 256);
        assert_eq!(buffer, data[512..768]);

        // short at end of file
        assert_eq!(backend.read_at(&mut buffer, 900).unwrap(), 124);
        assert_eq!(buffer[..124], data[900..]);

        let mut empty = [0u8; 0];
        assert!(matches!(backend.read_at(&mut empty, 0), Err(BackendError::InvalidRange { .. })));

        // writes never reach the file
        assert_eq!(backend.write_at(&[0u8; 16], 0).unwrap(), 0);
        backend.sync().unwrap();
        assert_eq!(std::fs::read(temp_file.path()).unwrap(), data);
    }
}
