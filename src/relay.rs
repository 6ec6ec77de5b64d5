/// Output relay: copies one child output stream to the supervisor's own
/// stream and doubles as the liveness heartbeat.
///
/// Every successful read raises the activity signal, whether or not the
/// bytes are forwarded. End of stream or any I/O failure ends the relay
/// quietly; that is how it learns the child has gone away.
use crate::activity::ActivitySignal;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Which child stream a relay serves. Only used for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Run a relay until the source closes.
///
/// `sink` is `None` when forwarding is disabled for this stream; reads still
/// happen so the child never blocks on a full pipe and activity is still
/// reported. A slow sink throttles the relay, which in turn throttles the
/// child through its pipe.
///
/// Returns the number of bytes read from the source.
pub async fn run<R, W>(
    stream: Stream,
    mut source: R,
    mut sink: Option<W>,
    buffer_size: usize,
    activity: ActivitySignal,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(%stream, error = %e, "relay read failed, closing");
                break;
            }
        };
        total += n as u64;
        activity.raise();

        if let Some(out) = sink.as_mut() {
            let written = match out.write_all(&buf[..n]).await {
                Ok(()) => out.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::debug!(%stream, error = %e, "relay write failed, closing");
                break;
            }
        }
    }

    tracing::debug!(%stream, bytes = total, "relay finished");
    total
}
