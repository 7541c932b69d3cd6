//! Audio capabilities used by playback: a decoder pulling from the song stream and a
//! PCM sink.
//!
//! Both run on the session's blocking output thread, never on a runtime worker, so a
//! decoder may block on the network and a sink may block on the device.

use std::path::PathBuf;

use symphonia::core::io::ReadOnlySource;

mod decoder;
#[cfg(feature = "device")]
mod device;
mod sink;
mod stream;

pub use decoder::{PcmDecoder, SymphoniaDecoder, PCM_SAMPLE_RATE};
#[cfg(feature = "device")]
pub use device::DeviceSink;
pub use sink::{NullSink, RawFileSink};
pub use stream::SongStream;
pub(crate) use stream::Feed;

/// One interleaved stereo sample pair.
pub type PcmFrame = [i16; 2];

/// A run of decoded frames and the rate they play at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub sample_rate: u32,
    pub frames: Vec<PcmFrame>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("stream ended inside a frame ({0} stray bytes)")]
    Truncated(usize),
    #[error("invalid audio data: {0}")]
    Invalid(String),
    #[error("reading song stream: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("audio output: {0}")]
    Io(#[from] std::io::Error),
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
}

/// Pull decoder over a song stream.
pub trait Decoder: Send {
    /// Next run of frames, `None` once the stream has ended cleanly.
    fn next_chunk(&mut self) -> Result<Option<PcmChunk>, DecodeError>;
}

pub trait AudioSink: Send {
    fn play(&mut self, chunk: &PcmChunk) -> Result<(), SinkError>;

    /// Block until everything handed to `play` has been rendered.
    /// Only called when the song ran to its end, not when it was stopped.
    fn drain(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Creates a fresh decoder and sink for each playback session.
pub trait AudioBackend: Send + Sync {
    /// Called on the output thread; recognising the format may read from `song`.
    fn decoder(&self, song: SongStream) -> Result<Box<dyn Decoder>, DecodeError>;
    fn sink(&self) -> Result<Box<dyn AudioSink>, SinkError>;
}

/// Symphonia for compressed songs (MP3 and whatever else it recognises), raw s16le for
/// `.pcm`/`.raw` files. Output goes to a file when `output` is set, else to the audio
/// device when `device` is set, else nowhere.
#[derive(Debug, Clone, Default)]
pub struct DefaultBackend {
    output: Option<PathBuf>,
    device: bool,
}

impl DefaultBackend {
    pub fn new(output: Option<PathBuf>, device: bool) -> Self {
        Self { output, device }
    }
}

impl AudioBackend for DefaultBackend {
    fn decoder(&self, song: SongStream) -> Result<Box<dyn Decoder>, DecodeError> {
        let ext = song.extension().map(str::to_owned);
        match ext.as_deref() {
            Some("pcm") | Some("raw") => Ok(Box::new(PcmDecoder::new(song, PCM_SAMPLE_RATE))),
            hint => Ok(Box::new(SymphoniaDecoder::new(
                Box::new(ReadOnlySource::new(song)),
                hint,
            )?)),
        }
    }

    fn sink(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        if let Some(path) = &self.output {
            return Ok(Box::new(RawFileSink::create(path)?));
        }
        if self.device {
            return open_device();
        }
        Ok(Box::new(NullSink::default()))
    }
}

#[cfg(feature = "device")]
fn open_device() -> Result<Box<dyn AudioSink>, SinkError> {
    Ok(Box::new(DeviceSink::open()?))
}

#[cfg(not(feature = "device"))]
fn open_device() -> Result<Box<dyn AudioSink>, SinkError> {
    Err(SinkError::Unavailable(
        "built without the `device` feature".to_string(),
    ))
}

#[cfg(test)]
pub(crate) mod testing {
    /// `count` silent mono MPEG-1 Layer III frames (128 kbit/s, 44.1 kHz, no CRC).
    /// Zeroed side info and main data decode to digital silence.
    pub fn silent_mp3(count: usize) -> Vec<u8> {
        const FRAME_LEN: usize = 417;
        let mut out = Vec::with_capacity(count * FRAME_LEN);
        for _ in 0..count {
            let start = out.len();
            out.extend_from_slice(&[0xFF, 0xFB, 0x90, 0xC0]);
            out.resize(start + FRAME_LEN, 0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// A song stream already holding `bytes` and its end marker.
    fn loaded_stream(bytes: Vec<u8>, filename: &str) -> SongStream {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Feed::Bytes(bytes)).unwrap();
        tx.try_send(Feed::End).unwrap();
        SongStream::new(rx, Arc::new(AtomicBool::new(false)), Some(filename))
    }

    fn drain_all(decoder: &mut dyn Decoder) -> Result<Vec<PcmChunk>, DecodeError> {
        let mut chunks = Vec::new();
        while let Some(chunk) = decoder.next_chunk()? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    #[test]
    fn default_backend_decodes_mp3() {
        let backend = DefaultBackend::new(None, false);
        let mut decoder = backend
            .decoder(loaded_stream(testing::silent_mp3(20), "x.mp3"))
            .unwrap();
        let chunks = drain_all(decoder.as_mut()).unwrap();
        let frames: usize = chunks.iter().map(|c| c.frames.len()).sum();
        assert!(frames > 0);
        assert_eq!(frames % 1152, 0);
        assert!(chunks.iter().all(|c| c.sample_rate == 44_100));
        assert!(chunks.iter().flat_map(|c| &c.frames).all(|f| *f == [0, 0]));
    }

    #[test]
    fn default_backend_treats_pcm_as_raw() {
        let backend = DefaultBackend::new(None, false);
        let mut decoder = backend
            .decoder(loaded_stream(vec![1, 0, 2, 0], "x.PCM"))
            .unwrap();
        let chunks = drain_all(decoder.as_mut()).unwrap();
        assert_eq!(
            chunks,
            vec![PcmChunk {
                sample_rate: PCM_SAMPLE_RATE,
                frames: vec![[1, 2]]
            }]
        );
    }

    #[test]
    fn unrecognised_audio_is_invalid() {
        let backend = DefaultBackend::new(None, false);
        let junk = b"definitely not an audio file. ".repeat(200);
        assert!(matches!(
            backend.decoder(loaded_stream(junk, "x.mp3")),
            Err(DecodeError::Invalid(_))
        ));
    }

    #[test]
    fn sink_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let mut sink = DefaultBackend::new(Some(path.clone()), true).sink().unwrap();
        sink.play(&PcmChunk {
            sample_rate: 44_100,
            frames: vec![[1, -2]],
        })
        .unwrap();
        drop(sink);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 0, 0xfe, 0xff]);

        assert!(DefaultBackend::new(None, false).sink().is_ok());
    }

    #[cfg(not(feature = "device"))]
    #[test]
    fn device_without_feature_is_unavailable() {
        assert!(matches!(
            DefaultBackend::new(None, true).sink(),
            Err(SinkError::Unavailable(_))
        ));
    }
}
