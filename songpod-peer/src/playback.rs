//! Playback controller: one inbound song stream at a time, Idle -> Requesting ->
//! Streaming -> Idle, stopped cooperatively between buffer fills.
//!
//! A PLAY while a session is active is rejected with `AlreadyPlaying`; the user
//! stops the current song first.
//!
//! A session is split in two. The network side runs on the runtime and forwards each
//! buffer fill through a bounded channel. Decoding and output run on a blocking
//! thread, so neither a slow decoder nor an audio device can hold up a worker.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use songpod_core::Message;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, AudioSink, DecodeError, Feed, SinkError, SongStream};
use crate::conn::{self, WireError};

/// Buffer fills queued for the output thread before the network side waits.
const FEED_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub dial_timeout: Duration,
    /// Bytes per buffer fill; also bounds how long a stop waits.
    pub read_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            read_buffer: 8 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Requesting,
    Streaming,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("a song is already playing")]
    AlreadyPlaying,
    #[error("peer {addr} unreachable: {source}")]
    PeerUnreachable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("sending PLAY request: {0}")]
    Request(#[from] WireError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Why a running session failed. The controller goes back to Idle; the process carries on.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("reading song stream: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("audio output task failed: {0}")]
    Output(#[from] JoinError),
}

/// Lifecycle notifications, in the order they happen.
#[derive(Debug)]
pub enum PlaybackEvent {
    Requesting { song_id: u32, peer: SocketAddr },
    Streaming { song_id: u32 },
    Finished { song_id: u32, bytes: u64, frames: u64 },
    /// The peer closed without sending anything.
    Unavailable { song_id: u32 },
    Stopped { song_id: u32 },
    Failed { song_id: u32, error: SessionError },
}

impl PlaybackEvent {
    /// Whether this event ends a session.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            PlaybackEvent::Requesting { .. } | PlaybackEvent::Streaming { .. }
        )
    }
}

impl fmt::Display for PlaybackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackEvent::Requesting { song_id, peer } => {
                write!(f, "requesting song {} from {}", song_id, peer)
            }
            PlaybackEvent::Streaming { song_id } => write!(f, "streaming song {}", song_id),
            PlaybackEvent::Finished {
                song_id,
                bytes,
                frames,
            } => write!(
                f,
                "song {} finished ({} bytes, {} frames)",
                song_id, bytes, frames
            ),
            PlaybackEvent::Unavailable { song_id } => {
                write!(f, "song {} is unavailable from its peer", song_id)
            }
            PlaybackEvent::Stopped { song_id } => write!(f, "song {} stopped", song_id),
            PlaybackEvent::Failed { song_id, error } => {
                write!(f, "song {} failed: {}", song_id, error)
            }
        }
    }
}

struct Session {
    song_id: u32,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Shared {
    state: PlaybackState,
    session: Option<Session>,
}

pub struct PlaybackController {
    backend: Arc<dyn AudioBackend>,
    config: PlaybackConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        config: PlaybackConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            backend,
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: PlaybackState::Idle,
                session: None,
            })),
            events,
        };
        (controller, rx)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// Request `song_id` from `peer` and start streaming it. Returns once streaming has
    /// begun; completion is reported through the event channel. The format is detected
    /// from the stream itself.
    pub async fn play(&self, song_id: u32, peer: SocketAddr) -> Result<(), PlaybackError> {
        self.play_song(song_id, peer, None).await
    }

    /// As `play`, with the song's file name as a format hint.
    pub async fn play_file(
        &self,
        song_id: u32,
        peer: SocketAddr,
        filename: &str,
    ) -> Result<(), PlaybackError> {
        self.play_song(song_id, peer, Some(filename.to_string())).await
    }

    async fn play_song(
        &self,
        song_id: u32,
        peer: SocketAddr,
        filename: Option<String>,
    ) -> Result<(), PlaybackError> {
        {
            let mut shared = self.shared.lock();
            if shared.state != PlaybackState::Idle {
                return Err(PlaybackError::AlreadyPlaying);
            }
            shared.state = PlaybackState::Requesting;
        }
        let _ = self.events.send(PlaybackEvent::Requesting { song_id, peer });
        match self.open(song_id, peer).await {
            Ok((stream, sink)) => {
                self.start(song_id, stream, sink, filename);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().state = PlaybackState::Idle;
                warn!("cannot play song {}: {}", song_id, e);
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        song_id: u32,
        peer: SocketAddr,
    ) -> Result<(TcpStream, Box<dyn AudioSink>), PlaybackError> {
        let mut stream = conn::dial(peer, self.config.dial_timeout)
            .await
            .map_err(|source| PlaybackError::PeerUnreachable { addr: peer, source })?;
        conn::send_message(&mut stream, &Message::Play { song_id }).await?;
        // Opening a device can block.
        let backend = self.backend.clone();
        let sink = tokio::task::spawn_blocking(move || backend.sink())
            .await
            .map_err(|e| SinkError::Unavailable(format!("opening audio output: {}", e)))??;
        Ok((stream, sink))
    }

    fn start(
        &self,
        song_id: u32,
        stream: TcpStream,
        sink: Box<dyn AudioSink>,
        filename: Option<String>,
    ) {
        let (stop, stop_rx) = oneshot::channel();
        let task = SessionTask {
            song_id,
            stream,
            sink,
            backend: self.backend.clone(),
            filename,
            stop: stop_rx,
            read_buffer: self.config.read_buffer,
            shared: self.shared.clone(),
            events: self.events.clone(),
        };
        // Held across the spawn so the task cannot publish Idle before the session is recorded.
        let mut shared = self.shared.lock();
        let task = tokio::spawn(task.run());
        shared.session = Some(Session {
            song_id,
            stop,
            task,
        });
        shared.state = PlaybackState::Streaming;
        let _ = self.events.send(PlaybackEvent::Streaming { song_id });
        info!("streaming song {}", song_id);
    }

    /// Stop the current session and wait until its connection, decoder and sink are
    /// released. Returns false when nothing was playing.
    pub async fn stop(&self) -> bool {
        let session = self.shared.lock().session.take();
        let Some(session) = session else {
            return false;
        };
        debug!("stopping song {}", session.song_id);
        let _ = session.stop.send(());
        let _ = session.task.await;
        true
    }
}

struct SessionTask {
    song_id: u32,
    stream: TcpStream,
    sink: Box<dyn AudioSink>,
    backend: Arc<dyn AudioBackend>,
    filename: Option<String>,
    stop: oneshot::Receiver<()>,
    read_buffer: usize,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

/// How the network side of a session ended.
enum Fed {
    /// The peer closed, or the output side stopped taking bytes.
    Ended { bytes: u64 },
    Stopped,
}

impl SessionTask {
    async fn run(self) {
        let SessionTask {
            song_id,
            mut stream,
            sink,
            backend,
            filename,
            mut stop,
            read_buffer,
            shared,
            events,
        } = self;

        let (feed, feed_rx) = mpsc::channel(FEED_DEPTH);
        let halt = Arc::new(AtomicBool::new(false));
        let song = SongStream::new(feed_rx, halt.clone(), filename.as_deref());
        let output_halt = halt.clone();
        let mut output =
            tokio::task::spawn_blocking(move || play_out(&*backend, song, sink, &output_halt));

        let fed = feed_stream(&mut stream, feed, &mut stop, read_buffer).await;
        drop(stream);

        let mut stopped = matches!(fed, Ok(Fed::Stopped));
        let played = if stopped || fed.is_err() {
            halt.store(true, Ordering::Release);
            output.await
        } else {
            // The output side may still be rendering; a stop cuts it short.
            let done = tokio::select! {
                biased;
                _ = &mut stop => None,
                played = &mut output => Some(played),
            };
            match done {
                Some(played) => played,
                None => {
                    stopped = true;
                    halt.store(true, Ordering::Release);
                    output.await
                }
            }
        };
        // Decoder and sink are gone once the output task has returned.
        let played = played.map_err(SessionError::from).and_then(|r| r);

        let event = match fed {
            _ if stopped => PlaybackEvent::Stopped { song_id },
            Ok(Fed::Stopped) => PlaybackEvent::Stopped { song_id },
            Err(e) => PlaybackEvent::Failed {
                song_id,
                error: SessionError::Io(e),
            },
            Ok(Fed::Ended { bytes: 0 }) => PlaybackEvent::Unavailable { song_id },
            Ok(Fed::Ended { bytes }) => match played {
                Ok(frames) => PlaybackEvent::Finished {
                    song_id,
                    bytes,
                    frames,
                },
                Err(error) => PlaybackEvent::Failed { song_id, error },
            },
        };
        if let PlaybackEvent::Failed { error, .. } = &event {
            warn!("song {} failed: {}", song_id, error);
        }
        {
            let mut shared = shared.lock();
            shared.state = PlaybackState::Idle;
            shared.session = None;
        }
        debug!("{}", event);
        let _ = events.send(event);
    }
}

/// Forward the song's bytes to the output thread until end of stream or stop. The
/// stop signal is checked before every buffer fill and while waiting for room in the
/// feed. Dropping `feed` on return wakes the output thread.
async fn feed_stream(
    stream: &mut TcpStream,
    feed: mpsc::Sender<Feed>,
    stop: &mut oneshot::Receiver<()>,
    read_buffer: usize,
) -> std::io::Result<Fed> {
    let mut buf = vec![0u8; read_buffer.max(1)];
    let mut bytes = 0u64;
    loop {
        let n = tokio::select! {
            biased;
            // A dropped sender (controller gone) also stops the session.
            _ = &mut *stop => return Ok(Fed::Stopped),
            read = stream.read(&mut buf) => read?,
        };
        let item = if n == 0 {
            Feed::End
        } else {
            bytes += n as u64;
            Feed::Bytes(buf[..n].to_vec())
        };
        let delivered = tokio::select! {
            biased;
            _ = &mut *stop => return Ok(Fed::Stopped),
            sent = feed.send(item) => sent.is_ok(),
        };
        if n == 0 || !delivered {
            return Ok(Fed::Ended { bytes });
        }
    }
}

/// Output thread body: decode the song and hand every chunk to the sink. Returns the
/// number of frames played.
fn play_out(
    backend: &dyn AudioBackend,
    song: SongStream,
    mut sink: Box<dyn AudioSink>,
    halt: &AtomicBool,
) -> Result<u64, SessionError> {
    let mut decoder = backend.decoder(song)?;
    let mut frames = 0u64;
    while let Some(chunk) = decoder.next_chunk()? {
        if halt.load(Ordering::Acquire) {
            return Ok(frames);
        }
        frames += chunk.frames.len() as u64;
        sink.play(&chunk)?;
    }
    if !halt.load(Ordering::Acquire) {
        sink.drain()?;
    }
    Ok(frames)
}
