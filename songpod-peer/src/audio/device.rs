//! Sound card output through kira.
//!
//! The audio manager lives on its own thread. Each chunk is scheduled on a kira clock
//! right after the previous one, and the thread stays at most `LOOKAHEAD_MS` ahead of
//! playback, which also bounds how long a stop waits on the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kira::clock::{ClockHandle, ClockSpeed, ClockTime};
use kira::sound::static_sound::{StaticSoundData, StaticSoundSettings};
use kira::{AudioManager, AudioManagerSettings, Frame, StartTime};
use tracing::{debug, warn};

use super::{AudioSink, PcmChunk, SinkError};

const TICKS_PER_SECOND: f64 = 1000.0;
const LOOKAHEAD_MS: f64 = 500.0;
/// Lead given to the first chunk, and after an underrun, so it is not scheduled in the past.
const START_LEAD_MS: f64 = 50.0;
const POLL: Duration = Duration::from_millis(10);

enum Command {
    Play(PcmChunk),
    Drain(SyncSender<()>),
}

pub struct DeviceSink {
    commands: Option<SyncSender<Command>>,
    halt: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSink {
    /// Open the default output device. Fails with `Unavailable` when there is none.
    pub fn open() -> Result<Self, SinkError> {
        let (commands, rx) = mpsc::sync_channel(1);
        let (ready_tx, ready) = mpsc::sync_channel(1);
        let halt = Arc::new(AtomicBool::new(false));
        let thread_halt = halt.clone();
        let thread = thread::Builder::new()
            .name("songpod-audio".to_string())
            .spawn(move || output_thread(rx, ready_tx, &thread_halt))?;
        match ready.recv() {
            Ok(Ok(())) => Ok(Self {
                commands: Some(commands),
                halt,
                thread: Some(thread),
            }),
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(SinkError::Unavailable(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(SinkError::Unavailable("audio thread exited".to_string()))
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), SinkError> {
        self.commands
            .as_ref()
            .and_then(|c| c.send(command).ok())
            .ok_or_else(|| SinkError::Unavailable("audio thread exited".to_string()))
    }
}

impl AudioSink for DeviceSink {
    fn play(&mut self, chunk: &PcmChunk) -> Result<(), SinkError> {
        self.send(Command::Play(chunk.clone()))
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        let (done_tx, done) = mpsc::sync_channel(1);
        self.send(Command::Drain(done_tx))?;
        done.recv()
            .map_err(|_| SinkError::Unavailable("audio thread exited".to_string()))
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.halt.store(true, Ordering::Release);
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Position on the output clock, in milliseconds since it started.
fn clock_ms(clock: &ClockHandle) -> f64 {
    let t = clock.time();
    t.ticks as f64 + t.fraction
}

fn output_thread(
    commands: Receiver<Command>,
    ready: SyncSender<Result<(), String>>,
    halt: &AtomicBool,
) {
    let mut manager: AudioManager = match AudioManager::new(AudioManagerSettings::default()) {
        Ok(m) => m,
        Err(e) => {
            let _ = ready.send(Err(format!("cannot open audio device: {}", e)));
            return;
        }
    };
    let mut clock = match manager.add_clock(ClockSpeed::TicksPerSecond(TICKS_PER_SECOND)) {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(format!("cannot create output clock: {}", e)));
            return;
        }
    };
    clock.start();
    if ready.send(Ok(())).is_err() {
        return;
    }
    debug!("audio device open");

    // End of the audio scheduled so far, in clock milliseconds.
    let mut scheduled = START_LEAD_MS;
    while let Ok(command) = commands.recv() {
        match command {
            Command::Play(chunk) => {
                if chunk.frames.is_empty() || chunk.sample_rate == 0 {
                    continue;
                }
                while scheduled > clock_ms(&clock) + LOOKAHEAD_MS {
                    if halt.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(POLL);
                }
                let now = clock_ms(&clock);
                if scheduled < now {
                    debug!("audio underrun of {:.0} ms", now - scheduled);
                    scheduled = now + START_LEAD_MS;
                }
                let start = ClockTime {
                    clock: clock.id(),
                    ticks: scheduled.floor() as u64,
                    fraction: scheduled.fract(),
                };
                let frames: Vec<Frame> = chunk
                    .frames
                    .iter()
                    .map(|[l, r]| Frame::new(*l as f32 / 32768.0, *r as f32 / 32768.0))
                    .collect();
                let data = StaticSoundData {
                    sample_rate: chunk.sample_rate,
                    frames: Arc::from(frames),
                    settings: StaticSoundSettings::new().start_time(StartTime::ClockTime(start)),
                    slice: None,
                };
                if let Err(e) = manager.play(data) {
                    warn!("dropping audio chunk: {}", e);
                }
                scheduled += chunk.frames.len() as f64 * TICKS_PER_SECOND / chunk.sample_rate as f64;
            }
            Command::Drain(done) => {
                while clock_ms(&clock) < scheduled {
                    if halt.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(POLL);
                }
                let _ = done.send(());
            }
        }
    }
}
