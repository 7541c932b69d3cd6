//! Interactive command loop: LIST, INFO, PLAY, STOP, QUIT.

use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use songpod_core::{format_record, CatalogEntry, SongCatalog};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::warn;

use crate::playback::{PlaybackController, PlaybackEvent};
use crate::tracker::TrackerClient;

const MENU: [Command; 5] = [
    Command::List,
    Command::Info,
    Command::Play,
    Command::Stop,
    Command::Quit,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    List,
    Info,
    Play,
    Stop,
    Quit,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::List => "LIST",
            Command::Info => "INFO",
            Command::Play => "PLAY",
            Command::Stop => "STOP",
            Command::Quit => "QUIT",
        }
    }
}

/// Accepts a command name (any case) or its 1-based menu number.
impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<usize>() {
            return n
                .checked_sub(1)
                .and_then(|i| MENU.get(i).copied())
                .ok_or_else(|| format!("no menu option {}", n));
        }
        MENU.iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("invalid command {:?}", s))
    }
}

/// Print playback notifications as they arrive.
pub async fn report_events(mut events: mpsc::UnboundedReceiver<PlaybackEvent>) {
    while let Some(event) = events.recv().await {
        if event.is_terminal() {
            println!("\n{}", event);
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

pub struct Shell<R> {
    lines: Lines<R>,
    catalog: Arc<SongCatalog>,
    tracker: TrackerClient,
    playback: PlaybackController,
}

impl<R: AsyncBufRead + Unpin> Shell<R> {
    pub fn new(
        input: R,
        catalog: Arc<SongCatalog>,
        tracker: TrackerClient,
        playback: PlaybackController,
    ) -> Self {
        Self {
            lines: input.lines(),
            catalog,
            tracker,
            playback,
        }
    }

    /// Run until QUIT or end of input. End of input is treated as QUIT.
    pub async fn run(mut self) -> std::io::Result<()> {
        loop {
            print_menu();
            let Some(line) = self.lines.next_line().await? else {
                self.quit().await;
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }
            let cmd = match line.parse::<Command>() {
                Ok(c) => c,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };
            if let Flow::Exit = self.execute(cmd).await? {
                return Ok(());
            }
        }
    }

    async fn execute(&mut self, cmd: Command) -> std::io::Result<Flow> {
        match cmd {
            Command::List => self.list().await,
            Command::Info => {
                if let Some(entry) = self.select_song().await? {
                    print_info(&entry);
                }
            }
            Command::Play => {
                if let Some(entry) = self.select_song().await? {
                    self.play(&entry).await;
                }
            }
            Command::Stop => {
                if !self.playback.stop().await {
                    println!("Nothing is playing.");
                }
            }
            Command::Quit => {
                self.quit().await;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    async fn list(&self) {
        match self.tracker.fetch_list().await {
            Ok(entries) => {
                self.catalog.replace_master(entries);
                print_master(&self.catalog.master());
            }
            Err(e) => {
                warn!("LIST failed: {}", e);
                println!("LIST failed: {}", e);
            }
        }
    }

    async fn play(&self, entry: &CatalogEntry) {
        let peer = match self.catalog.resolve_remote(entry.id) {
            Ok(p) => p,
            Err(e) => {
                println!("Cannot play: {}", e);
                return;
            }
        };
        match self.playback.play_file(entry.id, peer, &entry.filename).await {
            Ok(()) => println!("Playing {} by {}", entry.title, entry.artist),
            Err(e) => println!("Cannot play: {}", e),
        }
    }

    async fn quit(&self) {
        self.playback.stop().await;
        if let Err(e) = self.tracker.leave().await {
            warn!("QUIT failed: {}", e);
            println!("Could not notify tracker: {}", e);
        }
    }

    /// Prompt for a song id from the master list until a known one is given.
    /// A blank line or end of input cancels.
    async fn select_song(&mut self) -> std::io::Result<Option<CatalogEntry>> {
        if self.catalog.master().is_empty() {
            println!("No songs known; run LIST first.");
            return Ok(None);
        }
        loop {
            prompt("Select a song (blank to cancel): ");
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                return Ok(None);
            }
            match line.parse::<u32>().ok().and_then(|id| self.catalog.find_master(id)) {
                Some(entry) => return Ok(Some(entry)),
                None => println!("song id not here"),
            }
        }
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

fn print_menu() {
    println!();
    for (i, c) in MENU.iter().enumerate() {
        println!("  {}) {}", i + 1, c.name());
    }
    prompt("Select option: ");
}

fn print_master(entries: &[CatalogEntry]) {
    if entries.is_empty() {
        println!("The tracker knows no songs.");
        return;
    }
    for e in entries {
        println!("{}: {}, {}", e.id, e.title, e.artist);
    }
}

fn print_info(entry: &CatalogEntry) {
    println!("{}", format_record(entry));
    match entry.owner {
        Some(owner) => println!("served by {}", owner),
        None => println!("no serving peer"),
    }
}
