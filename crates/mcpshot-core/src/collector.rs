use crate::codec::JsonLineCodec;
use crate::error::McpShotError;
use crate::protocol::Response;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

/// Amount of a child's error stream kept for diagnostics
pub const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

/// Time allowed for the stderr drain to catch up after the process is gone
pub const DEFAULT_STDERR_GRACE: Duration = Duration::from_millis(500);

/// One parsed output line together with its raw text
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseLine {
    pub raw: String,
    pub response: Response,
}

/// Everything one process invocation produced
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub lines: Vec<ResponseLine>,
    pub stderr: String,
    /// Set when the responses were read but the process could not be torn
    /// down within its bound
    pub cleanup_error: Option<String>,
}

impl Collected {
    /// The response to the last request of the batch
    pub fn last(&self) -> Option<&ResponseLine> {
        self.lines.last()
    }
}

/// Read `stdout` to end-of-stream and parse every non-blank line.
///
/// A malformed line fails the whole collection with `Parse`; nothing is
/// skipped. The read is bounded by `read_timeout`.
pub async fn collect_responses<R>(stdout: R, read_timeout: Duration) -> Result<Vec<ResponseLine>, McpShotError>
where
    R: AsyncRead + Unpin,
{
    let read_all = async {
        let mut frames = FramedRead::new(stdout, JsonLineCodec::new());
        let mut lines = Vec::new();
        while let Some(frame) = frames.next().await {
            let raw = frame?;
            let response = Response::parse_line(&raw)?;
            debug!(id = %response.id, error = response.is_error(), "Collected response line");
            lines.push(ResponseLine { raw, response });
        }
        Ok::<_, McpShotError>(lines)
    };

    tokio::time::timeout(read_timeout, read_all)
        .await
        .map_err(|_| McpShotError::ReadTimeout(read_timeout))?
}

/// Read only the first non-blank output line, unparsed
pub async fn read_first_line<R>(stdout: R, read_timeout: Duration) -> Result<Option<String>, McpShotError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(stdout, JsonLineCodec::new());
    match tokio::time::timeout(read_timeout, frames.next()).await {
        Ok(Some(line)) => line.map(Some),
        Ok(None) => Ok(None),
        Err(_) => Err(McpShotError::ReadTimeout(read_timeout)),
    }
}

/// Concurrent drain of a child's error stream.
///
/// Keeps the child from blocking on a full stderr pipe and retains the first
/// `STDERR_CAPTURE_LIMIT` bytes for diagnostics.
pub struct StderrCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl StderrCapture {
    pub fn spawn<R>(stderr: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = stderr.map(|mut stream| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut kept = buffer.lock().await;
                            let room = STDERR_CAPTURE_LIMIT.saturating_sub(kept.len());
                            kept.extend_from_slice(&chunk[..n.min(room)]);
                        }
                        Err(e) => {
                            debug!(error = %e, "stderr drain stopped");
                            break;
                        }
                    }
                }
            })
        });
        Self { buffer, task }
    }

    /// Text captured so far, without waiting
    pub async fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().await).into_owned()
    }

    /// Wait up to `grace` for the stream to end, then return what was captured
    pub async fn finish(mut self, grace: Duration) -> String {
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!(grace = ?grace, "stderr still open after grace period");
                abort.abort();
            }
        }
        self.snapshot().await
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_collect_responses_in_arrival_order() {
        let output = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"content\":[]}}\n",
        );
        let lines = collect_responses(output.as_bytes(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].response.id, crate::protocol::RequestId::Number(2));
        assert!(lines[1].raw.contains("\"id\":2"));
    }

    #[tokio::test]
    async fn test_collect_responses_fails_on_malformed_line() {
        let output = "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\nTraceback (most recent call last)\n";
        let err = collect_responses(output.as_bytes(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.diagnostic(), Some("Traceback (most recent call last)"));
    }

    #[tokio::test]
    async fn test_collect_responses_times_out() {
        let (_writer, reader) = tokio::io::duplex(64);
        let err = collect_responses(reader, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpShotError::ReadTimeout(_)));
    }

    #[tokio::test]
    async fn test_read_first_line() {
        let output = "\n{\"first\":true}\n{\"second\":true}\n";
        let first = read_first_line(output.as_bytes(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("{\"first\":true}"));

        let none = read_first_line(&b""[..], Duration::from_secs(1)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_stderr_capture_is_bounded() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let capture = StderrCapture::spawn(Some(reader));

        let noise = vec![b'x'; STDERR_CAPTURE_LIMIT + 10_000];
        writer.write_all(&noise).await.unwrap();
        drop(writer);

        let text = capture.finish(Duration::from_secs(2)).await;
        assert_eq!(text.len(), STDERR_CAPTURE_LIMIT);
    }

    #[tokio::test]
    async fn test_stderr_capture_without_stream() {
        let capture = StderrCapture::spawn::<tokio::io::DuplexStream>(None);
        assert_eq!(capture.finish(Duration::from_millis(10)).await, "");
    }
}
