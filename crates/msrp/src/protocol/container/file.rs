use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::utils::ensure;
use crate::protocol::ContainerError;
use crate::protocol::container::DataContainer;

/// File backed container with no size bound.
///
/// Reads and writes are blocking file operations.
#[derive(Debug)]
pub struct FileContainer {
    file: Option<File>,
    size: u64,
    read_position: u64,
}

impl FileContainer {
    /// An anonymous temporary file, removed by the OS once disposed.
    pub fn temporary() -> Result<Self, ContainerError> {
        let file = tempfile::tempfile()?;
        Ok(Self { file: Some(file), size: 0, read_position: 0 })
    }

    /// Opens an existing file, typically to send it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file: Some(file), size, read_position: 0 })
    }

    /// Creates (or truncates) a file to receive into.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        Ok(Self { file: Some(file), size: 0, read_position: 0 })
    }

    fn file(&mut self) -> Result<&mut File, ContainerError> {
        self.file.as_mut().ok_or(ContainerError::Disposed)
    }
}

impl DataContainer for FileContainer {
    fn get(&mut self, dst: &mut [u8]) -> Result<usize, ContainerError> {
        let position = self.read_position;
        let n = (dst.len() as u64).min(self.size.saturating_sub(position)) as usize;
        let file = self.file()?;
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut dst[..n])?;
        self.read_position += n as u64;
        Ok(n)
    }

    fn get_at(&mut self, offset: u64, size: usize) -> Result<Bytes, ContainerError> {
        let available = self.size.saturating_sub(offset);
        let file = self.file()?;
        ensure!((size as u64) <= available, ContainerError::not_enough_data(offset, size as u64, available));

        let mut buf = BytesMut::zeroed(size);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf.freeze())
    }

    fn put_at(&mut self, offset: u64, data: &[u8]) -> Result<(), ContainerError> {
        let end = offset.checked_add(data.len() as u64).ok_or_else(|| ContainerError::not_enough_storage(u64::MAX, u64::MAX))?;
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.size = self.size.max(end);
        Ok(())
    }

    fn rewind_read(&mut self, n: u64) -> Result<(), ContainerError> {
        self.file()?;
        ensure!(n <= self.read_position, ContainerError::not_enough_data(self.read_position, n, self.read_position));
        self.read_position -= n;
        Ok(())
    }

    fn read_position(&self) -> u64 {
        self.read_position
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn dispose(&mut self) {
        if self.file.take().is_some() {
            trace!(size = self.size, "disposed file container");
        }
    }

    fn is_disposed(&self) -> bool {
        self.file.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_existing_file() {
        let mut named = tempfile::NamedTempFile::new().unwrap();
        named.write_all(b"file content").unwrap();
        named.flush().unwrap();

        let mut container = FileContainer::open(named.path()).unwrap();
        assert_eq!(container.size(), 12);
        assert_eq!(&container.get_at(5, 7).unwrap()[..], b"content");
    }

    #[test]
    fn sparse_writes_extend_size() {
        let mut container = FileContainer::temporary().unwrap();
        container.put_at(4, b"tail").unwrap();
        assert_eq!(container.size(), 8);
        container.put_at(0, b"head").unwrap();
        assert_eq!(&container.read_all().unwrap()[..], b"headtail");
    }

    #[test]
    fn offset_overflow_is_rejected() {
        let mut container = FileContainer::temporary().unwrap();
        assert!(matches!(container.put_at(u64::MAX - 1, b"tail"), Err(ContainerError::NotEnoughStorage { .. })));
        assert_eq!(container.size(), 0);
    }
}
