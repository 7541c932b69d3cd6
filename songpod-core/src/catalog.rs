//! Song catalog: entry type, `.info` record format, catalog payloads and the shared
//! local/master catalog.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One song. Local entries have no owner; master entries carry the serving peer's address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: u32,
    pub title: String,
    pub artist: String,
    pub filename: String,
    pub owner: Option<SocketAddr>,
}

impl CatalogEntry {
    pub fn new(id: u32, title: &str, artist: &str, filename: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            artist: artist.to_string(),
            filename: filename.to_string(),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: SocketAddr) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// INIT payload: the local catalog plus the port this peer serves songs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogAdvert {
    pub listen_port: u16,
    pub entries: Vec<CatalogEntry>,
}

/// Error parsing one `.info` record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing '{0}' delimiter")]
    MissingDelimiter(char),
    #[error("invalid song id {0:?}")]
    InvalidId(String),
    #[error("empty {0}")]
    EmptyField(&'static str),
}

/// Parse one record of the form `<id>: <title>, <artist>> <filename>`.
pub fn parse_record(line: &str) -> Result<CatalogEntry, RecordError> {
    let line = line.trim();
    let (id, rest) = line
        .split_once(':')
        .ok_or(RecordError::MissingDelimiter(':'))?;
    let id = id
        .trim()
        .parse::<u32>()
        .map_err(|_| RecordError::InvalidId(id.trim().to_string()))?;
    let (meta, filename) = rest
        .split_once('>')
        .ok_or(RecordError::MissingDelimiter('>'))?;
    // Titles may contain commas; the artist follows the last one.
    let (title, artist) = meta
        .rsplit_once(',')
        .ok_or(RecordError::MissingDelimiter(','))?;
    let title = title.trim();
    let filename = filename.trim();
    if title.is_empty() {
        return Err(RecordError::EmptyField("title"));
    }
    if filename.is_empty() {
        return Err(RecordError::EmptyField("filename"));
    }
    Ok(CatalogEntry::new(id, title, artist.trim(), filename))
}

/// Parse every non-blank line of `text` as a record.
pub fn parse_records(text: &str) -> impl Iterator<Item = Result<CatalogEntry, RecordError>> + '_ {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_record)
}

/// Render an entry in record format.
pub fn format_record(entry: &CatalogEntry) -> String {
    format!(
        "{}: {}, {}> {}",
        entry.id, entry.title, entry.artist, entry.filename
    )
}

/// Catalog lookup or payload error.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("song {0} not found")]
    SongNotFound(u32),
    #[error("song {0} has no owner address")]
    NoOwner(u32),
    #[error("catalog payload: {0}")]
    Codec(#[from] bincode::Error),
}

pub fn encode_advert(advert: &CatalogAdvert) -> Result<Vec<u8>, CatalogError> {
    Ok(bincode::serialize(advert)?)
}

pub fn decode_advert(payload: &[u8]) -> Result<CatalogAdvert, CatalogError> {
    Ok(bincode::deserialize(payload)?)
}

pub fn encode_master(entries: &[CatalogEntry]) -> Result<Vec<u8>, CatalogError> {
    Ok(bincode::serialize(entries)?)
}

pub fn decode_master(payload: &[u8]) -> Result<Vec<CatalogEntry>, CatalogError> {
    Ok(bincode::deserialize(payload)?)
}

/// Songs this peer hosts plus the master list last fetched from the tracker.
/// Local entries are fixed at construction; the master list is replaced wholesale.
pub struct SongCatalog {
    song_dir: PathBuf,
    local: Vec<CatalogEntry>,
    master: RwLock<Arc<Vec<CatalogEntry>>>,
}

impl SongCatalog {
    pub fn new(song_dir: impl Into<PathBuf>, local: Vec<CatalogEntry>) -> Self {
        Self {
            song_dir: song_dir.into(),
            local,
            master: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn local(&self) -> &[CatalogEntry] {
        &self.local
    }

    /// Path of a locally hosted song.
    pub fn resolve(&self, id: u32) -> Result<PathBuf, CatalogError> {
        self.local
            .iter()
            .find(|e| e.id == id)
            .map(|e| self.song_dir.join(&e.filename))
            .ok_or(CatalogError::SongNotFound(id))
    }

    /// Address of the peer serving a song, from the master list.
    pub fn resolve_remote(&self, id: u32) -> Result<SocketAddr, CatalogError> {
        let entry = self.find_master(id).ok_or(CatalogError::SongNotFound(id))?;
        entry.owner.ok_or(CatalogError::NoOwner(id))
    }

    /// Snapshot of the current master list. Stays valid across later replacements.
    pub fn master(&self) -> Arc<Vec<CatalogEntry>> {
        self.master.read().clone()
    }

    pub fn find_master(&self, id: u32) -> Option<CatalogEntry> {
        self.master().iter().find(|e| e.id == id).cloned()
    }

    /// Swap in a new master list. Readers see either the old or the new list in full.
    pub fn replace_master(&self, entries: Vec<CatalogEntry>) {
        *self.master.write() = Arc::new(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_record() {
        let e = parse_record("1: X, Y> x.mp3").unwrap();
        assert_eq!(e, CatalogEntry::new(1, "X", "Y", "x.mp3"));
        assert!(e.owner.is_none());
    }

    #[test]
    fn parse_tolerates_whitespace() {
        let e = parse_record("  42 :  Blue in Green ,  Miles Davis >  blue.mp3  \r\n").unwrap();
        assert_eq!(e.id, 42);
        assert_eq!(e.title, "Blue in Green");
        assert_eq!(e.artist, "Miles Davis");
        assert_eq!(e.filename, "blue.mp3");
    }

    #[test]
    fn parse_title_with_comma() {
        let e = parse_record("3: Hello, Goodbye, The Beatles> hg.mp3").unwrap();
        assert_eq!(e.title, "Hello, Goodbye");
        assert_eq!(e.artist, "The Beatles");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(
            parse_record("1: X, Y x.mp3").unwrap_err(),
            RecordError::MissingDelimiter('>')
        );
        assert_eq!(
            parse_record("no colon here").unwrap_err(),
            RecordError::MissingDelimiter(':')
        );
        assert_eq!(
            parse_record("1: X Y> x.mp3").unwrap_err(),
            RecordError::MissingDelimiter(',')
        );
        assert!(matches!(
            parse_record("one: X, Y> x.mp3"),
            Err(RecordError::InvalidId(_))
        ));
        assert_eq!(
            parse_record("1: X, Y>   ").unwrap_err(),
            RecordError::EmptyField("filename")
        );
    }

    #[test]
    fn parse_records_skips_blank_lines() {
        let text = "1: A, B> a.mp3\n\n2: C, D c.mp3\n3: E, F> e.mp3\n";
        let results: Vec<_> = parse_records(text).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().id, 3);
    }

    #[test]
    fn format_then_parse() {
        let e = CatalogEntry::new(9, "Song", "Band", "song.mp3");
        assert_eq!(format_record(&e), "9: Song, Band> song.mp3");
        assert_eq!(parse_record(&format_record(&e)).unwrap(), e);
    }

    #[test]
    fn payload_roundtrip() {
        let owner: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        let advert = CatalogAdvert {
            listen_port: 4000,
            entries: vec![CatalogEntry::new(1, "X", "Y", "x.mp3")],
        };
        let bytes = encode_advert(&advert).unwrap();
        assert_eq!(decode_advert(&bytes).unwrap(), advert);

        let master = vec![CatalogEntry::new(1, "X", "Y", "x.mp3").with_owner(owner)];
        let bytes = encode_master(&master).unwrap();
        assert_eq!(decode_master(&bytes).unwrap(), master);
    }

    #[test]
    fn garbage_payload_is_codec_error() {
        assert!(matches!(
            decode_master(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 1]),
            Err(CatalogError::Codec(_))
        ));
    }

    #[test]
    fn resolve_local_and_remote() {
        let catalog = SongCatalog::new(
            "/srv/songs",
            vec![CatalogEntry::new(1, "X", "Y", "x.mp3")],
        );
        assert_eq!(
            catalog.resolve(1).unwrap(),
            PathBuf::from("/srv/songs/x.mp3")
        );
        assert!(matches!(catalog.resolve(2), Err(CatalogError::SongNotFound(2))));

        assert!(matches!(
            catalog.resolve_remote(1),
            Err(CatalogError::SongNotFound(1))
        ));
        let owner: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        catalog.replace_master(vec![
            CatalogEntry::new(1, "X", "Y", "x.mp3").with_owner(owner),
            CatalogEntry::new(2, "Z", "W", "z.mp3"),
        ]);
        assert_eq!(catalog.resolve_remote(1).unwrap(), owner);
        assert!(matches!(catalog.resolve_remote(2), Err(CatalogError::NoOwner(2))));
    }

    #[test]
    fn replace_master_keeps_old_snapshots_whole() {
        let catalog = SongCatalog::new(".", Vec::new());
        catalog.replace_master(vec![
            CatalogEntry::new(1, "A", "a", "a.mp3"),
            CatalogEntry::new(2, "B", "b", "b.mp3"),
        ]);
        let before = catalog.master();
        catalog.replace_master(vec![CatalogEntry::new(3, "C", "c", "c.mp3")]);
        assert_eq!(before.len(), 2);
        assert_eq!(catalog.master().len(), 1);
        assert!(catalog.find_master(1).is_none());
        assert_eq!(catalog.find_master(3).unwrap().title, "C");
    }

    #[test]
    fn concurrent_readers_never_see_mixed_lists() {
        let catalog = Arc::new(SongCatalog::new(".", Vec::new()));
        let list_a: Vec<_> = (0..50).map(|i| CatalogEntry::new(i, "A", "a", "a.mp3")).collect();
        let list_b: Vec<_> = (100..180).map(|i| CatalogEntry::new(i, "B", "b", "b.mp3")).collect();
        catalog.replace_master(list_a.clone());

        let writer = {
            let catalog = catalog.clone();
            let (a, b) = (list_a.clone(), list_b.clone());
            std::thread::spawn(move || {
                for i in 0..500 {
                    catalog.replace_master(if i % 2 == 0 { b.clone() } else { a.clone() });
                }
            })
        };
        for _ in 0..500 {
            let snap = catalog.master();
            assert!(*snap == list_a || *snap == list_b);
        }
        writer.join().unwrap();
    }
}
