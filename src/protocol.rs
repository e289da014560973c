//! Line-delimited JSON framing between the supervisor and the worker.
//!
//! A request is one JSON object terminated by `\n` on the worker's stdin.
//! A response is every byte the worker writes to stdout up to and including
//! the next `\n`.

use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Path the worker interprets as "read the image from the clipboard".
pub const CLIPBOARD_IMAGE_PATH: &str = "clipboard";

/// Initial capacity of the response buffer. Responses may grow past it.
const RESPONSE_BUFFER_SIZE: usize = 10 * 1024;

/// What the worker should recognize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    /// Image file on disk, resolved by the worker
    Path(String),
    /// Encoded image content (PNG, JPEG, ...)
    Bytes(Vec<u8>),
}

impl ImageInput {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    pub fn clipboard() -> Self {
        Self::Path(CLIPBOARD_IMAGE_PATH.to_string())
    }

    /// Short description for logs; never includes image content.
    pub fn describe(&self) -> String {
        match self {
            ImageInput::Path(path) => format!("path {}", path),
            ImageInput::Bytes(bytes) => format!("{} bytes", bytes.len()),
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestLine<'a> {
    Path {
        image_path: &'a str,
    },
    Base64 {
        image_base64: String,
    },
}

/// Encode a request as one JSON line, including the trailing newline.
pub fn encode_request(input: &ImageInput) -> Result<Vec<u8>> {
    let line = match input {
        ImageInput::Path(path) => RequestLine::Path { image_path: path },
        ImageInput::Bytes(bytes) => RequestLine::Base64 {
            image_base64: STANDARD.encode(bytes),
        },
    };
    let mut encoded = serde_json::to_vec(&line)?;
    encoded.push(b'\n');
    Ok(encoded)
}

/// Write an already-encoded request line and flush it to the worker.
pub async fn write_request<W>(writer: &mut W, line: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one response line, newline included.
///
/// End of stream before a newline is reported as `UnexpectedEof`.
pub async fn read_response<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content = Vec::with_capacity(RESPONSE_BUFFER_SIZE);
    reader.read_until(b'\n', &mut content).await?;
    if content.last() != Some(&b'\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "OCR process closed its output after {} bytes of a response",
                content.len()
            ),
        )
        .into());
    }
    Ok(content)
}
