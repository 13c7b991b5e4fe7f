//! File-backed request store using JSON lines.
//!
//! Each line is one request record. Writes rewrite the whole file through a
//! temporary file in the same directory and an atomic rename, so a crash leaves
//! either the old or the new contents.

use std::collections::BTreeMap;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::core::request::RequestRecord;
use crate::core::store::RequestStore;
use crate::core::SchedulerError;
use crate::util::serde::ClientId;

/// File-backed request store.
pub struct FileRequestStore {
    path: PathBuf,
    lines: Mutex<BTreeMap<(ClientId, String), String>>,
}

impl FileRequestStore {
    /// Open (or create) a store at `path`, loading any existing lines.
    ///
    /// # Errors
    ///
    /// Fails if the parent directory cannot be created or the file cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }
        let mut lines = BTreeMap::new();
        for line in read_lines(&path)? {
            match RequestRecord::from_json(&line) {
                Ok(record) => {
                    lines.insert((record.client_name, record.identifier), line);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable line"),
            }
        }
        debug!(path = %path.display(), records = lines.len(), "opened request store");
        Ok(Self {
            path,
            lines: Mutex::new(lines),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rewrite(&self, lines: &BTreeMap<(ClientId, String), String>) -> Result<(), SchedulerError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        for line in lines.values() {
            writeln!(temp, "{line}")?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|e| SchedulerError::Io(e.error))?;
        Ok(())
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, SchedulerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = OpenOptions::new().read(true).open(path)?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

impl RequestStore for FileRequestStore {
    fn save(&self, record: &RequestRecord) -> Result<(), SchedulerError> {
        let line = record.to_json()?;
        let mut lines = self.lines.lock();
        lines.insert((record.client_name.clone(), record.identifier.clone()), line);
        self.rewrite(&lines)
    }

    fn delete(&self, client: &ClientId, identifier: &str) -> Result<(), SchedulerError> {
        let mut lines = self.lines.lock();
        if lines.remove(&(client.clone(), identifier.to_string())).is_none() {
            return Ok(());
        }
        self.rewrite(&lines)
    }

    fn load_all(&self) -> Result<Vec<Result<RequestRecord, SchedulerError>>, SchedulerError> {
        Ok(read_lines(&self.path)?
            .iter()
            .map(|line| RequestRecord::from_json(line))
            .collect())
    }
}
