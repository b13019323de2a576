use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::task::JoinError;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use crate::codec::TransactionDecoder;
use crate::connection::{MessageWriter, TransactionReceiver};
use crate::manager::TransactionManager;
use crate::protocol::MsrpError;

/// An MSRP connection carrying the transactions of every session bound to its manager.
///
/// `MsrpConnection` runs both directions of one connection:
/// - the read half is decoded in the task calling [`process`](Self::process) and
///   every complete transaction is handed to the manager
/// - the write half is served by a spawned task that waits for queued data and
///   expires outstanding responses while idle
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
///
pub struct MsrpConnection<R, W> {
    framed_read: FramedRead<R, TransactionDecoder>,
    writer: MessageWriter<W>,
    manager: Arc<TransactionManager>,
}

impl<R, W> MsrpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, manager: Arc<TransactionManager>) -> Self {
        let config = manager.stack().config();
        let decoder = TransactionDecoder::with_max_header_bytes(config.max_header_bytes);
        let buffer_size = config.output_buffer_size();
        Self {
            framed_read: FramedRead::with_capacity(reader, decoder, 8 * 1024),
            writer: MessageWriter::with_capacity(writer, buffer_size),
            manager,
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Runs the connection until the peer closes it, an I/O or framing error occurs
    /// or the manager is closed.
    ///
    /// Every session bound to the manager gets `connection_lost` when this returns.
    pub async fn process(self) -> Result<(), MsrpError> {
        let Self { mut framed_read, writer, manager } = self;
        let mut receiver = TransactionReceiver::new(Arc::clone(&manager));
        let mut write_task = tokio::spawn(write_loop(writer, Arc::clone(&manager)));

        let (result, writer_done) = select! {
            result = read_loop(&mut framed_read, &mut receiver) => (result, false),
            joined = &mut write_task => (flatten(joined), true),
        };

        let cause = match &result {
            Ok(()) => "connection closed".to_string(),
            Err(e) => e.to_string(),
        };
        manager.connection_lost(Some(cause));

        if !writer_done {
            if let Err(e) = flatten(write_task.await) {
                warn!(cause = %e, "writer stopped with error");
            }
        }
        result
    }
}

async fn read_loop<R>(framed_read: &mut FramedRead<R, TransactionDecoder>, receiver: &mut TransactionReceiver) -> Result<(), MsrpError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match framed_read.next().await {
            Some(Ok(frame)) => receiver.on_frame(frame)?,

            Some(Err(e)) => {
                error!(cause = %e, "can't frame incoming data, close connection");
                return Err(e.into());
            }

            None => {
                if receiver.is_receiving() {
                    warn!("connection closed inside a transaction");
                }
                info!("cant read more transactions, break this connection down");
                return Ok(());
            }
        }
    }
}

async fn write_loop<W>(mut writer: MessageWriter<W>, manager: Arc<TransactionManager>) -> Result<(), MsrpError>
where
    W: AsyncWrite + Unpin,
{
    let idle_wait = manager.stack().config().idle_wait();
    loop {
        let woken = manager.wait_for_data(idle_wait).await;
        manager.check_response_timeouts();

        if manager.is_closed() {
            writer.clear_buf();
            if let Err(e) = writer.get_mut().shutdown().await {
                debug!(cause = %e, "shutdown write half");
            }
            return Ok(());
        }
        if !woken {
            continue;
        }

        while writer.fill(&manager)? > 0 {
            writer.flush().await?;
        }
    }
}

fn flatten(joined: Result<Result<(), MsrpError>, JoinError>) -> Result<(), MsrpError> {
    joined.map_err(|e| MsrpError::internal(format!("writer task failed: {e}")))?
}
