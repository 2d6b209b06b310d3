use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use error_stack::{IntoReport, ResultExt};

#[derive(Debug)]
pub struct LedgerError;
impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist ledger error")
    }
}
impl std::error::Error for LedgerError {}

pub type LedgerResult<T> = error_stack::Result<T, LedgerError>;

const LEDGER_FILE_NAME: &str = "existing_playlists_file.dat";

/// A ledger older than this is discarded wholesale, forcing a full
/// reconciliation against the live playlist list.
const RETENTION_DAYS: u64 = 30;

/// Persisted set of playlist names known to have been created, one name per
/// line. Names keep their insertion order so persisted output is
/// deterministic.
#[derive(Debug)]
pub struct PlaylistLedger {
    path: PathBuf,
    names: Vec<String>,
    loaded_from_disk: bool,
}

/// Age predicate for the persisted ledger file.
fn is_expired(created: SystemTime, now: SystemTime) -> bool {
    match now.duration_since(created) {
        Ok(age) => age >= Duration::from_secs(RETENTION_DAYS * 24 * 60 * 60),
        // Created in the future, clock went backwards. Keep the file.
        Err(_) => false,
    }
}

impl PlaylistLedger {
    /// Loads the ledger from the app-data directory. An expired file is
    /// deleted and treated as absent; unreadable files degrade to an empty
    /// ledger rather than aborting.
    pub fn load(appdata_dir: &Path) -> Self {
        let path = appdata_dir.join(LEDGER_FILE_NAME);
        let empty = Self {
            path: path.clone(),
            names: Vec::new(),
            loaded_from_disk: false,
        };

        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.len() > 0 => metadata,
            _ => return empty,
        };
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or_else(|_| SystemTime::now());
        if is_expired(created, SystemTime::now()) {
            log::info!("Ledger file is older than {} days, discarding", RETENTION_DAYS);
            if let Err(err) = fs::remove_file(&path) {
                log::warn!("Failed to delete expired ledger file: {}", err);
            }
            return empty;
        }

        match fs::read_to_string(&path) {
            Ok(contents) => {
                let mut ledger = empty;
                for line in contents.lines() {
                    if !line.is_empty() {
                        ledger.record(line.to_string());
                    }
                }
                ledger.loaded_from_disk = true;
                ledger
            }
            Err(err) => {
                log::warn!("Failed to read ledger file, treating as absent: {}", err);
                empty
            }
        }
    }

    /// Whether a live (non-expired) ledger existed on disk at startup.
    pub fn loaded_from_disk(&self) -> bool {
        self.loaded_from_disk
    }

    /// Adds a playlist name, keeping the set deduplicated.
    pub fn record(&mut self, name: String) {
        if !self.names.iter().any(|existing| existing == &name) {
            self.names.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|existing| existing == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Writes the full set back, replacing prior contents. The write goes to
    /// a temp file first and is renamed into place, so an interrupted run
    /// leaves the previous ledger untouched.
    pub fn persist(&self) -> LedgerResult<()> {
        let tmp_path = self.path.with_extension("dat.tmp");
        fs::write(&tmp_path, self.names.join("\n"))
            .into_report()
            .attach_printable(format!(
                "Failed to write ledger file at {}",
                tmp_path.display()
            ))
            .change_context(LedgerError)?;
        fs::rename(&tmp_path, &self.path)
            .into_report()
            .attach_printable(format!(
                "Failed to replace ledger file at {}",
                self.path.display()
            ))
            .change_context(LedgerError)?;
        Ok(())
    }
}
