//! Local library: scan the song directory for `.info` records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use songpod_core::catalog::parse_records;
use songpod_core::CatalogEntry;
use tracing::{debug, info, warn};

const INFO_EXTENSION: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("cannot read song directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn is_info_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(INFO_EXTENSION))
        .unwrap_or(false)
}

/// Scan `dir` (not recursive) for `.info` files and parse their records.
/// Malformed records and unreadable files are skipped; a repeated id keeps its first record.
/// Entries are returned sorted by id.
pub fn register_local(dir: &Path) -> Result<Vec<CatalogEntry>, LibraryError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| LibraryError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = read_dir
        .filter_map(|e| match e {
            Ok(e) => Some(e.path()),
            Err(err) => {
                warn!("error while scanning {}, skipping an entry: {}", dir.display(), err);
                None
            }
        })
        .filter(|p| p.is_file() && is_info_file(p))
        .collect();
    // read_dir order is unspecified; keep "first record wins" reproducible.
    files.sort();

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for path in files {
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(err) => {
                warn!("skipping {}: {}", path.display(), err);
                continue;
            }
        };
        for record in parse_records(&text) {
            match record {
                Ok(entry) => {
                    if seen.insert(entry.id) {
                        debug!("found song {} ({})", entry.id, entry.filename);
                        entries.push(entry);
                    } else {
                        warn!(
                            "duplicate song id {} in {}, keeping the first record",
                            entry.id,
                            path.display()
                        );
                    }
                }
                Err(err) => warn!("skipping malformed record in {}: {}", path.display(), err),
            }
        }
    }
    entries.sort_by_key(|e| e.id);
    info!("{} songs found in {}", entries.len(), dir.display());
    Ok(entries)
}
