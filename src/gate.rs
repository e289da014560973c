//! Startup handshake: wait for the worker to announce it is ready.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Printed by the worker once its models are loaded.
pub const READY_MARKER: &str = "OCR init completed.";

/// Bootstrap output allowed before the marker must have appeared.
pub const STARTUP_OUTPUT_LIMIT: usize = 4096;

/// Why the worker never became ready.
#[derive(Debug)]
pub enum GateFailure {
    /// Output ended before the marker; carries everything read so far.
    Eof { output: Vec<u8> },
    /// The worker printed more than the limit without the marker.
    TooLong,
    /// Reading the worker's output failed.
    Io(std::io::Error),
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateFailure::Eof { output } => write!(
                f,
                "output ended before ready marker, output: {}",
                String::from_utf8_lossy(output).trim()
            ),
            GateFailure::TooLong => write!(f, "output too long"),
            GateFailure::Io(e) => write!(f, "reading output failed: {}", e),
        }
    }
}

/// Consume bootstrap output until `marker` appears.
///
/// Reads at most `limit` bytes. Anything the worker printed after the marker
/// in the same read is dropped with the buffer.
pub async fn wait_until_ready<R>(
    reader: &mut R,
    marker: &str,
    limit: usize,
) -> Result<(), GateFailure>
where
    R: AsyncRead + Unpin,
{
    let marker = marker.as_bytes();
    let mut buf = vec![0u8; limit];
    let mut filled = 0;

    loop {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(GateFailure::Io)?;
        if n == 0 {
            buf.truncate(filled);
            return Err(GateFailure::Eof { output: buf });
        }
        filled += n;

        if contains(&buf[..filled], marker) {
            tracing::debug!("OCR process ready after {} bytes of output", filled);
            return Ok(());
        }
        if filled >= buf.len() {
            return Err(GateFailure::TooLong);
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
