//! Request handler: read one TSP request from an accepted connection and act on it.

use std::time::Duration;

use songpod_core::{CatalogError, FrameBuffer, FrameDecodeError, Message, SongCatalog};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const READ_CHUNK: usize = 4096;
/// File bytes per write while streaming a song.
const SEND_CHUNK: usize = 16 * 1024;

/// Per-connection failure. Always contained: the connection is closed, the server keeps going.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
    #[error("peer closed before sending a full request")]
    Incomplete,
    #[error("peer stalled past the idle timeout")]
    TimedOut,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Wait for the request on `stream`, bounded by `max_wait`.
///
/// Each readiness notification drains the socket until it would block, feeding a
/// frame buffer, so a request split over any number of segments is reassembled.
/// Bytes after the first complete frame are ignored.
pub async fn read_request(stream: &TcpStream, max_wait: Duration) -> Result<Message, HandlerError> {
    tokio::time::timeout(max_wait, drain_until_message(stream))
        .await
        .map_err(|_| HandlerError::TimedOut)?
}

async fn drain_until_message(stream: &TcpStream) -> Result<Message, HandlerError> {
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        stream.readable().await?;
        loop {
            match stream.try_read(&mut chunk) {
                Ok(0) => return frames.next_message()?.ok_or(HandlerError::Incomplete),
                Ok(n) => {
                    frames.extend(&chunk[..n]);
                    if let Some(msg) = frames.next_message()? {
                        return Ok(msg);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Act on a decoded request. PLAY streams the song file and closes; anything else
/// just closes. Returns the number of body bytes sent.
///
/// An unknown song id returns `SongNotFound` before any byte is written, so the
/// requester sees an empty stream. A requester that stops reading for longer than
/// `idle` gets `TimedOut` and its connection is dropped.
pub async fn handle_request(
    mut stream: TcpStream,
    msg: Message,
    catalog: &SongCatalog,
    idle: Duration,
) -> Result<u64, HandlerError> {
    match msg {
        Message::Play { song_id } => {
            let path = catalog.resolve(song_id)?;
            let file = tokio::fs::File::open(&path).await?;
            let sent = send_file(file, &mut stream, idle).await?;
            tokio::time::timeout(idle, stream.shutdown())
                .await
                .map_err(|_| HandlerError::TimedOut)??;
            debug!("sent song {} ({} bytes)", song_id, sent);
            Ok(sent)
        }
        other => {
            debug!("ignoring {} request", other.message_type());
            Ok(0)
        }
    }
}

/// Copy `file` to `stream`; every write must make progress within `idle`.
async fn send_file(
    mut file: tokio::fs::File,
    stream: &mut TcpStream,
    idle: Duration,
) -> Result<u64, HandlerError> {
    let mut buf = vec![0u8; SEND_CHUNK];
    let mut sent = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(sent);
        }
        tokio::time::timeout(idle, stream.write_all(&buf[..n]))
            .await
            .map_err(|_| HandlerError::TimedOut)??;
        sent += n as u64;
    }
}
