use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// What the network side hands the output thread.
#[derive(Debug)]
pub(crate) enum Feed {
    Bytes(Vec<u8>),
    /// The peer closed the connection after the last byte.
    End,
}

/// Blocking reader over the bytes of one inbound song, fed from the session task.
///
/// A clean end of the song reads as EOF. A feed that goes away without `End`, or a
/// raised halt flag, reads as `ConnectionAborted` so a decoder never mistakes a stopped
/// or broken transfer for a finished song.
pub struct SongStream {
    feed: mpsc::Receiver<Feed>,
    halt: Arc<AtomicBool>,
    current: Vec<u8>,
    pos: usize,
    ended: bool,
    extension: Option<String>,
}

impl SongStream {
    pub(crate) fn new(
        feed: mpsc::Receiver<Feed>,
        halt: Arc<AtomicBool>,
        filename: Option<&str>,
    ) -> Self {
        let extension = filename
            .and_then(|f| Path::new(f).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        Self {
            feed,
            halt,
            current: Vec::new(),
            pos: 0,
            ended: false,
            extension,
        }
    }

    /// Lower-cased extension of the song's file name, when it is known.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }
}

impl Read for SongStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.halt.load(Ordering::Acquire) {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "playback stopped"));
            }
            if self.pos < self.current.len() {
                let n = out.len().min(self.current.len() - self.pos);
                out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.ended {
                return Ok(0);
            }
            match self.feed.blocking_recv() {
                Some(Feed::Bytes(bytes)) => {
                    self.current = bytes;
                    self.pos = 0;
                }
                Some(Feed::End) => self.ended = true,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "song stream cut off",
                    ))
                }
            }
        }
    }
}
