use crate::codec::JsonLineCodec;
use crate::error::McpShotError;
use crate::protocol::Batch;
use futures::SinkExt;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tracing::debug;

/// A framing failure, tagged with the zero-based index of the item that failed.
#[derive(Debug)]
pub struct FrameError {
    pub index: usize,
    pub source: std::io::Error,
}

/// Write every item as one JSON line, flushing after each, then close `stdin`.
///
/// The writer is consumed: closing it is the end-of-batch signal the server
/// reads to end-of-stream for.
pub async fn write_lines<W, T>(stdin: W, items: impl IntoIterator<Item = T>) -> Result<usize, FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut sink = FramedWrite::new(stdin, JsonLineCodec::new());
    let mut written = 0;

    for (index, item) in items.into_iter().enumerate() {
        // `send` flushes, so each line is visible to the child before the next
        sink.send(item).await.map_err(|e| FrameError {
            index,
            source: into_io(e),
        })?;
        written += 1;
    }

    SinkExt::<T>::close(&mut sink).await.map_err(|e| FrameError {
        index: written,
        source: into_io(e),
    })?;
    debug!(lines = written, "Batch written and input closed");
    Ok(written)
}

pub async fn write_batch<W>(stdin: W, batch: &Batch) -> Result<usize, FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_lines(stdin, batch.requests()).await
}

fn into_io(error: McpShotError) -> std::io::Error {
    match error {
        McpShotError::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    }
}
