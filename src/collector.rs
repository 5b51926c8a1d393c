/// Output capture for a supervised child.
///
/// Each pipe is drained by its own task that owns its chunk list; the
/// supervisor gets the bytes back by joining the tasks once the child has
/// exited. The only state shared with the watchdog is the [`ActivityClock`].
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

const READ_CHUNK_BYTES: usize = 8192;

/// Timestamp of the most recent byte received on either stream.
///
/// Stored as milliseconds since a fixed origin so it can be updated without
/// a lock.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    /// New clock whose last activity is "now".
    pub fn start() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        })
    }

    pub fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Time elapsed since the last recorded activity.
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Bytes captured from both streams, in arrival order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Handles to the two reader tasks.
pub struct OutputCollector {
    stdout: JoinHandle<std::io::Result<Vec<Vec<u8>>>>,
    stderr: JoinHandle<std::io::Result<Vec<Vec<u8>>>>,
}

impl OutputCollector {
    /// Start draining both streams.
    pub fn attach<O, E>(stdout: O, stderr: E, clock: Arc<ActivityClock>) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            stdout: tokio::spawn(drain(stdout, "stdout", Arc::clone(&clock))),
            stderr: tokio::spawn(drain(stderr, "stderr", clock)),
        }
    }

    /// Wait for both streams to close and return what they produced.
    pub async fn finish(self) -> std::io::Result<CollectedOutput> {
        let stdout = join_stream(self.stdout).await?;
        let stderr = join_stream(self.stderr).await?;
        Ok(CollectedOutput {
            stdout: stdout.concat(),
            stderr: stderr.concat(),
        })
    }
}

async fn join_stream(
    handle: JoinHandle<std::io::Result<Vec<Vec<u8>>>>,
) -> std::io::Result<Vec<Vec<u8>>> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(format!("output reader task failed: {e}"))),
    }
}

async fn drain<R>(
    mut reader: R,
    stream: &'static str,
    clock: Arc<ActivityClock>,
) -> std::io::Result<Vec<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut chunks = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream, error = %e, "failed to read child output");
                return Err(e);
            }
        };
        if n == 0 {
            break;
        }
        clock.touch();
        chunks.push(buf[..n].to_vec());
    }
    tracing::debug!(stream, chunks = chunks.len(), "child stream closed");
    Ok(chunks)
}
