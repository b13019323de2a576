use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::manager::TransactionManager;
use crate::protocol::MsrpError;

/// Output buffer of one connection, filled from the manager's send queue.
#[derive(Debug)]
pub struct MessageWriter<W> {
    writer: W,
    buffer: BytesMut,
    capacity: usize,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn with_capacity(writer: W, buffer_size: usize) -> Self {
        Self { writer, buffer: BytesMut::with_capacity(buffer_size), capacity: buffer_size }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn clear_buf(&mut self) {
        self.buffer.clear();
    }

    /// Replaces the buffer content with the next bytes `manager` has to send.
    ///
    /// Returns the number of bytes buffered, `0` when nothing is queued.
    pub fn fill(&mut self, manager: &TransactionManager) -> Result<usize, MsrpError> {
        self.clear_buf();
        manager.get_data_to_send(&mut self.buffer, self.capacity)
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<(), MsrpError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.writer.write_all(self.buffer.as_ref()).await?;
        self.buffer.clear();
        Ok(self.writer.flush().await?)
    }
}
