use bytes::{Bytes, BytesMut};

use crate::utils::ensure;
use crate::protocol::ContainerError;
use crate::protocol::container::DataContainer;

/// In-memory container, bounded by a maximum capacity.
#[derive(Debug)]
pub struct MemoryContainer {
    data: Option<BytesMut>,
    capacity: u64,
    read_position: u64,
}

impl MemoryContainer {
    /// A container preallocated for exactly `size` bytes.
    pub fn with_size(size: usize) -> Self {
        let mut data = BytesMut::with_capacity(size);
        data.resize(size, 0);
        Self { data: Some(data), capacity: size as u64, read_position: 0 }
    }

    /// An empty container that grows on write up to `max_size` bytes.
    pub fn growable(max_size: usize) -> Self {
        Self { data: Some(BytesMut::new()), capacity: max_size as u64, read_position: 0 }
    }

    /// A container holding `bytes`, used for outgoing messages.
    pub fn from_bytes(bytes: impl Into<BytesMut>) -> Self {
        let data = bytes.into();
        let capacity = data.len() as u64;
        Self { data: Some(data), capacity, read_position: 0 }
    }

    fn data(&self) -> Result<&BytesMut, ContainerError> {
        self.data.as_ref().ok_or(ContainerError::Disposed)
    }
}

impl DataContainer for MemoryContainer {
    fn get(&mut self, dst: &mut [u8]) -> Result<usize, ContainerError> {
        let position = self.read_position as usize;
        let data = self.data()?;
        let n = dst.len().min(data.len().saturating_sub(position));
        dst[..n].copy_from_slice(&data[position..position + n]);
        self.read_position += n as u64;
        Ok(n)
    }

    fn get_at(&mut self, offset: u64, size: usize) -> Result<Bytes, ContainerError> {
        let data = self.data()?;
        let available = (data.len() as u64).saturating_sub(offset);
        ensure!((size as u64) <= available, ContainerError::not_enough_data(offset, size as u64, available));
        let start = offset as usize;
        Ok(Bytes::copy_from_slice(&data[start..start + size]))
    }

    fn put_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ContainerError> {
        let capacity = self.capacity;
        let data = self.data.as_mut().ok_or(ContainerError::Disposed)?;
        let required = offset.checked_add(bytes.len() as u64);
        let Some(end) = required.filter(|end| *end <= capacity) else {
            return Err(ContainerError::not_enough_storage(required.unwrap_or(u64::MAX), capacity));
        };

        let end = end as usize;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    fn rewind_read(&mut self, n: u64) -> Result<(), ContainerError> {
        self.data()?;
        ensure!(n <= self.read_position, ContainerError::not_enough_data(self.read_position, n, self.read_position));
        self.read_position -= n;
        Ok(())
    }

    fn read_position(&self) -> u64 {
        self.read_position
    }

    fn size(&self) -> u64 {
        self.data.as_ref().map_or(0, |data| data.len() as u64)
    }

    fn dispose(&mut self) {
        self.data.take();
    }

    fn is_disposed(&self) -> bool {
        self.data.is_none()
    }
}
