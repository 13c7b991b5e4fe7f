//! On-disk list of completed, unacknowledged request identifiers.
//!
//! One file per direction (`completed.list.downloads`,
//! `completed.list.uploads`) with a `.bak` sibling, plus the single legacy
//! `completed.list` read once for migration. Writes go to a temp file in the
//! same directory, which becomes the backup and is then renamed over the
//! primary.

use std::fs::{self, create_dir_all, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::core::request::Direction;
use crate::core::SchedulerError;

/// Name of the pre-split list shared by both directions.
pub const LEGACY_FILE: &str = "completed.list";

/// Which copy a list was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    /// The primary file.
    Primary,
    /// The backup file.
    Backup,
    /// The legacy single file.
    Legacy,
    /// No file existed.
    Missing,
}

/// Identifiers read at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedList {
    /// Identifiers in file order.
    pub identifiers: Vec<String>,
    /// Where they came from.
    pub source: ListSource,
}

impl LoadedList {
    /// True when neither the primary nor the backup could be read, so the list
    /// should be written back even if nothing else changes.
    pub fn needs_rewrite(&self) -> bool {
        matches!(self.source, ListSource::Legacy | ListSource::Missing)
    }
}

/// The primary/backup file pair for one direction.
#[derive(Debug, Clone)]
pub struct CompletedListFiles {
    dir: PathBuf,
    primary: PathBuf,
    backup: PathBuf,
    legacy: PathBuf,
}

impl CompletedListFiles {
    /// Files for `direction` inside `dir`.
    pub fn new(dir: impl AsRef<Path>, direction: Direction) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let primary = dir.join(format!("{LEGACY_FILE}.{}", direction.as_str()));
        let backup = dir.join(format!("{LEGACY_FILE}.{}.bak", direction.as_str()));
        let legacy = dir.join(LEGACY_FILE);
        Self {
            dir,
            primary,
            backup,
            legacy,
        }
    }

    /// Path of the primary file.
    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Path of the backup file.
    pub fn backup(&self) -> &Path {
        &self.backup
    }

    /// Path of the legacy file.
    pub fn legacy(&self) -> &Path {
        &self.legacy
    }

    /// Read the primary, falling back to the backup and then the legacy file.
    /// A successful primary read deletes the legacy file. Missing files are
    /// not errors.
    pub fn load(&self) -> LoadedList {
        if let Some(identifiers) = read_list(&self.primary) {
            match fs::remove_file(&self.legacy) {
                Ok(()) => info!(path = %self.legacy.display(), "removed legacy completed list"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %self.legacy.display(), error = %e, "could not remove legacy list"),
            }
            return LoadedList {
                identifiers,
                source: ListSource::Primary,
            };
        }
        if let Some(identifiers) = read_list(&self.backup) {
            warn!(path = %self.backup.display(), "primary completed list unreadable, using backup");
            return LoadedList {
                identifiers,
                source: ListSource::Backup,
            };
        }
        match read_list(&self.legacy) {
            Some(identifiers) => {
                info!(path = %self.legacy.display(), count = identifiers.len(), "migrating legacy completed list");
                LoadedList {
                    identifiers,
                    source: ListSource::Legacy,
                }
            }
            None => LoadedList {
                identifiers: Vec::new(),
                source: ListSource::Missing,
            },
        }
    }

    /// Write `identifiers`, one per line.
    ///
    /// # Errors
    ///
    /// Fails if the temp file cannot be written or the final rename fails
    /// twice.
    pub fn save<'a, I>(&self, identifiers: I) -> Result<(), SchedulerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        create_dir_all(&self.dir)?;
        let mut temp = tempfile::Builder::new()
            .prefix(LEGACY_FILE)
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        let mut count = 0usize;
        for identifier in identifiers {
            writeln!(temp, "{identifier}")?;
            count += 1;
        }
        temp.as_file_mut().flush()?;
        temp.as_file().sync_all()?;

        match fs::remove_file(&self.backup) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        temp.persist(&self.backup).map_err(|e| SchedulerError::Io(e.error))?;

        if let Err(first) = fs::rename(&self.backup, &self.primary) {
            debug!(error = %first, "rename over primary failed, deleting primary and retrying");
            let _ = fs::remove_file(&self.primary);
            if let Err(e) = fs::rename(&self.backup, &self.primary) {
                error!(
                    from = %self.backup.display(),
                    to = %self.primary.display(),
                    error = %e,
                    "unable to store completed identifiers list"
                );
                return Err(e.into());
            }
        }
        debug!(path = %self.primary.display(), count, "saved completed list");
        Ok(())
    }
}

fn read_list(path: &Path) -> Option<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            error!(path = %path.display(), error = %e, "could not open completed list");
            return None;
        }
    };
    let mut identifiers = Vec::new();
    for line in BufReader::new(file).lines() {
        match line {
            Ok(line) if line.is_empty() => {}
            Ok(line) => identifiers.push(line),
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not read completed list");
                return None;
            }
        }
    }
    Some(identifiers)
}
