use std::io::{ErrorKind, Read};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as CodecDecoder, DecoderOptions};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::{DecodeError, Decoder, PcmChunk, PcmFrame};

/// Rate assumed for raw PCM, which carries no header.
pub const PCM_SAMPLE_RATE: u32 = 44_100;

const FRAME_BYTES: usize = 4;
const PCM_READ: usize = 16 * 1024;

/// Raw 16-bit little-endian stereo.
pub struct PcmDecoder<R> {
    source: R,
    sample_rate: u32,
    pending: Vec<u8>,
    buf: Vec<u8>,
}

impl<R: Read> PcmDecoder<R> {
    pub fn new(source: R, sample_rate: u32) -> Self {
        Self {
            source,
            sample_rate,
            pending: Vec::new(),
            buf: vec![0; PCM_READ],
        }
    }
}

impl<R: Read + Send> Decoder for PcmDecoder<R> {
    fn next_chunk(&mut self) -> Result<Option<PcmChunk>, DecodeError> {
        loop {
            let n = match self.source.read(&mut self.buf) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Err(DecodeError::Truncated(std::mem::take(&mut self.pending).len()));
            }
            self.pending.extend_from_slice(&self.buf[..n]);
            let whole = self.pending.len() - self.pending.len() % FRAME_BYTES;
            if whole == 0 {
                continue;
            }
            let frames = self.pending[..whole]
                .chunks_exact(FRAME_BYTES)
                .map(|c| {
                    [
                        i16::from_le_bytes([c[0], c[1]]),
                        i16::from_le_bytes([c[2], c[3]]),
                    ]
                })
                .collect();
            self.pending.drain(..whole);
            return Ok(Some(PcmChunk {
                sample_rate: self.sample_rate,
                frames,
            }));
        }
    }
}

/// Any container symphonia recognises (MP3 first of all), read as it arrives.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    codec: Box<dyn CodecDecoder>,
    track_id: u32,
}

impl SymphoniaDecoder {
    /// Detect the container in `source` and open its default track. Blocks until enough
    /// of the stream has arrived to recognise it.
    pub fn new(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(source, Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let detected = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                Error::IoError(io) if io.kind() != ErrorKind::UnexpectedEof => DecodeError::Io(io),
                other => DecodeError::Invalid(other.to_string()),
            })?;
        let format = detected.format;
        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::Invalid("no audio track".to_string()))?;
        let track_id = track.id;
        let codec = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(invalid)?;
        debug!("decoding track {} ({:?})", track_id, track.codec_params.codec);
        Ok(Self {
            format,
            codec,
            track_id,
        })
    }
}

fn invalid(e: Error) -> DecodeError {
    DecodeError::Invalid(e.to_string())
}

impl Decoder for SymphoniaDecoder {
    fn next_chunk(&mut self) -> Result<Option<PcmChunk>, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(Error::IoError(e)) => return Err(DecodeError::Io(e)),
                Err(e) => return Err(invalid(e)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.codec.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    samples.copy_interleaved_ref(decoded);
                    return Ok(Some(PcmChunk {
                        sample_rate: spec.rate,
                        frames: to_stereo(samples.samples(), spec.channels.count()),
                    }));
                }
                // A corrupt packet costs its own samples, not the song.
                Err(Error::DecodeError(e)) => debug!("skipping undecodable packet: {}", e),
                Err(e) => return Err(invalid(e)),
            }
        }
    }
}

/// Mono is doubled; beyond two channels only the first two are kept.
fn to_stereo(samples: &[i16], channels: usize) -> Vec<PcmFrame> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().map(|&s| [s, s]).collect(),
        n => samples.chunks_exact(n).map(|c| [c[0], c[1]]).collect(),
    }
}
