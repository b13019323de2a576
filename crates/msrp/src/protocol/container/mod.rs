//! Random access byte storage behind a message.
//!
//! A [`DataContainer`] holds the body of one message while it is sent or received.
//! Two implementations are provided:
//!
//! - [`MemoryContainer`]: a byte array bounded by the configured short message size
//! - [`FileContainer`]: a random access file, unbounded
//!
//! Which one a message gets is decided by whoever constructs the message (see
//! [`crate::manager::MsrpStack::new_container`]). After [`DataContainer::dispose`]
//! every operation fails with [`ContainerError::Disposed`].

mod file;
mod memory;

pub use file::FileContainer;
pub use memory::MemoryContainer;

use std::fmt;

use bytes::Bytes;

use crate::protocol::ContainerError;

pub trait DataContainer: Send + fmt::Debug {
    /// Reads sequentially into `dst`, advancing the read cursor.
    ///
    /// Returns the number of bytes copied, `0` once all data has been read.
    fn get(&mut self, dst: &mut [u8]) -> Result<usize, ContainerError>;

    /// Reads `size` bytes at `offset` without touching the read cursor.
    fn get_at(&mut self, offset: u64, size: usize) -> Result<Bytes, ContainerError>;

    /// Writes `data` at `offset`, growing the container if it allows growth.
    fn put_at(&mut self, offset: u64, data: &[u8]) -> Result<(), ContainerError>;

    /// Moves the read cursor back by `n` bytes.
    fn rewind_read(&mut self, n: u64) -> Result<(), ContainerError>;

    fn read_position(&self) -> u64;

    fn size(&self) -> u64;

    /// Releases the underlying memory or file. Calling it twice is a no-op.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;

    /// Reads the next byte, advancing the read cursor.
    fn get_byte(&mut self) -> Result<u8, ContainerError> {
        let mut byte = [0u8; 1];
        match self.get(&mut byte)? {
            1 => Ok(byte[0]),
            _ => Err(ContainerError::not_enough_data(self.read_position(), 1, 0)),
        }
    }

    /// Appends one byte at the current end of the data.
    fn put_byte(&mut self, byte: u8) -> Result<(), ContainerError> {
        let size = self.size();
        self.put_at(size, &[byte])
    }

    fn has_data_to_read(&self) -> bool {
        !self.is_disposed() && self.read_position() < self.size()
    }

    /// Copies the whole content.
    fn read_all(&mut self) -> Result<Bytes, ContainerError> {
        let size = usize::try_from(self.size()).map_err(|_| ContainerError::not_enough_storage(self.size(), usize::MAX as u64))?;
        self.get_at(0, size)
    }
}
