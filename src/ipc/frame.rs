//! Length-prefixed framing
//!
//! One message per frame: `[u32 big-endian length][payload]`. The same codec
//! runs over Unix sockets and in-process pipes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Largest payload accepted by default (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Read one frame
///
/// Returns `Ok(None)` when the peer closed the stream between frames. Frames
/// larger than `max_len` are read past and dropped with a warning, so the
/// stream stays usable.
///
/// # Errors
///
/// Returns error on IO failure or EOF inside a frame, header included
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let Some(len) = read_header(reader).await? else {
            return Ok(None);
        };

        if len > max_len {
            skip_payload(reader, len).await?;
            tracing::warn!(len, max_len, "dropping oversized frame");
            continue;
        }

        let mut payload = vec![0u8; len];
        if len > 0 {
            reader.read_exact(&mut payload).await?;
        }
        return Ok(Some(payload));
    }
}

/// Read the length prefix, `None` on a clean EOF before its first byte
async fn read_header<R>(reader: &mut R) -> Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Channel(format!(
                "stream ended after {filled} of {HEADER_LEN} header bytes"
            )));
        }
        filled += n;
    }
    Ok(Some(u32::from_be_bytes(len_buf) as usize))
}

async fn skip_payload<R>(reader: &mut R, len: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let expected = len as u64;
    let skipped = tokio::io::copy(&mut reader.take(expected), &mut tokio::io::sink()).await?;
    if skipped < expected {
        return Err(Error::Channel(format!(
            "stream ended inside an oversized frame ({skipped} of {len} bytes)"
        )));
    }
    Ok(())
}

/// Write one frame and flush it
///
/// # Errors
///
/// Returns error on IO failure or a payload that does not fit a `u32` length
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Channel(format!("payload of {} bytes is too large", payload.len())))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
