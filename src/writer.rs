//! Dedicated writer task.
//!
//! All outbound frames funnel through a single mpsc channel into one task
//! that owns the socket's write half, so frames are never interleaved on the
//! wire and send order is FIFO per connection.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::{ClientError, Result};

/// Outbound queue depth. Requests are rate-bound by callers awaiting their
/// responses, so the queue never builds real depth.
const CHANNEL_CAPACITY: usize = 64;

/// Handle for queueing frames to the writer task. Cheaply cloneable.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue one encoded frame for sending.
    ///
    /// Fails with `NotConnected` once the writer task has stopped.
    pub(crate) async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| ClientError::NotConnected)
    }
}

/// Spawn the writer task over the socket's write half.
///
/// The task stops on the shutdown signal, when every handle is dropped, or
/// on the first write error (the reader observes the dead socket and runs
/// the disconnect path).
pub(crate) fn spawn_writer<W>(
    writer: W,
    shutdown: broadcast::Receiver<()>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer, shutdown));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            frame = rx.recv() => {
                let frame = match frame {
                    Some(frame) => frame,
                    None => return Ok(()),
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::error!("send failed: {e}");
                    return Err(ClientError::Connection(e));
                }
            }
        }
    }
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
