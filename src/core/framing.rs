//! Length-prefixed framing used on worker stdio.
//!
//! A frame is a 20-digit, zero-padded decimal length header followed by the
//! raw payload bytes. The same framing is used in both directions.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the decimal length header.
pub const HEADER_LEN: usize = 20;

/// Largest payload accepted from a worker.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum FrameError {
    /// The stream failed or closed.
    Io(io::Error),
    /// The header is not a decimal length.
    BadHeader(Vec<u8>),
    /// The declared length exceeds [`MAX_FRAME_LEN`].
    TooLarge(usize),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Build a complete frame for `payload`.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(format!("{:0width$}", payload.len(), width = HEADER_LEN).as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parse a length header. Surrounding whitespace is tolerated.
#[must_use]
pub fn parse_header(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns the underlying I/O error, typically a broken pipe when the
/// process already exited.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}

/// Read exactly one frame.
///
/// # Errors
///
/// [`FrameError::BadHeader`] if the header does not parse, [`FrameError::Io`]
/// on stream failure or EOF.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = parse_header(&header).ok_or_else(|| FrameError::BadHeader(header.to_vec()))?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
