//! Outbound TSP helpers: bounded dial, send one frame, read one frame.

use std::time::Duration;

use songpod_core::{encode_frame, FrameBuffer, FrameDecodeError, FrameEncodeError, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

const READ_CHUNK: usize = 4096;

/// Error exchanging frames on an established connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error("connection closed before a full message arrived")]
    Closed,
    #[error("timed out waiting for a message")]
    TimedOut,
}

/// Connect with an upper bound on the wait. An elapsed timeout is reported as `TimedOut`.
pub async fn dial<A: ToSocketAddrs>(addr: A, timeout: Duration) -> std::io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

pub async fn send_message<W>(writer: &mut W, msg: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one message, accumulating across as many reads as it takes.
pub async fn read_message<R>(reader: &mut R, timeout: Duration) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_one(reader))
        .await
        .map_err(|_| WireError::TimedOut)?
}

async fn read_one<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(msg) = frames.next_message()? {
            return Ok(msg);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(WireError::Closed);
        }
        frames.extend(&chunk[..n]);
    }
}
