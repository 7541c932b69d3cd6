use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{AudioSink, PcmChunk, SinkError};

/// Discards frames, counting them.
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl AudioSink for NullSink {
    fn play(&mut self, chunk: &PcmChunk) -> Result<(), SinkError> {
        self.frames += chunk.frames.len() as u64;
        Ok(())
    }
}

/// Writes frames as s16le stereo to a file. The sample rate is not recorded.
pub struct RawFileSink {
    out: BufWriter<File>,
}

impl RawFileSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl AudioSink for RawFileSink {
    fn play(&mut self, chunk: &PcmChunk) -> Result<(), SinkError> {
        for [l, r] in &chunk.frames {
            self.out.write_all(&l.to_le_bytes())?;
            self.out.write_all(&r.to_le_bytes())?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for RawFileSink {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(frames: Vec<[i16; 2]>) -> PcmChunk {
        PcmChunk {
            sample_rate: 44_100,
            frames,
        }
    }

    #[test]
    fn null_sink_counts() {
        let mut s = NullSink::default();
        s.play(&chunk(vec![[0, 0], [1, 1]])).unwrap();
        s.play(&chunk(vec![[2, 2]])).unwrap();
        assert_eq!(s.frames(), 3);
    }

    #[test]
    fn file_sink_writes_s16le() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let mut sink = RawFileSink::create(&path).unwrap();
        sink.play(&chunk(vec![[1, -2], [258, 0]])).unwrap();
        sink.drain().unwrap();
        assert_eq!(
            std::fs::read(&path).unwrap(),
            vec![1, 0, 0xfe, 0xff, 2, 1, 0, 0]
        );
    }

    #[test]
    fn file_sink_reports_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RawFileSink::create(&dir.path().join("no/such/dir/out.pcm")),
            Err(SinkError::Io(_))
        ));
    }
}
