//! The shield record: one timestamp on disk saying when the shield was
//! last raised. No file means the shield is down.

use chrono::NaiveDateTime;
use esa_utils::local_time::{format_timestamp, local_now, parse_timestamp};
use std::fs::{remove_file, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// What's on disk, without acting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    /// No record file.
    Absent,
    /// A well-formed timestamp.
    Valid(NaiveDateTime),
    /// The file exists but is empty or doesn't hold a timestamp.
    Malformed(String),
    /// The file couldn't be read.
    Unreadable(String),
}

/// Handle on the shield record file.
#[derive(Debug, Clone)]
pub struct ShieldRecord {
    path: PathBuf,
}

impl ShieldRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the current local time. For callers that don't carry their
    /// own clock; the controller passes its evaluation time to [`write`].
    ///
    /// [`write`]: ShieldRecord::write
    pub fn write_now(&self) -> Result<NaiveDateTime, RecordStoreError> {
        let now = local_now();
        self.write(&now)?;
        Ok(now)
    }

    /// Records `at`, replacing any existing record. The timestamp goes to a
    /// sibling file first and is renamed into place, so a reader sees the
    /// old record or the new one and never a partial write.
    pub fn write(&self, at: &NaiveDateTime) -> Result<(), RecordStoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| self.write_error(e))?;
            }
        }

        let pending = PendingRecord::new(&self.path);
        {
            let mut f = File::create(&pending.path).map_err(|e| self.write_error(e))?;
            f.write_all(format_timestamp(at).as_bytes())
                .map_err(|e| self.write_error(e))?;
            f.sync_all().map_err(|e| self.write_error(e))?;
        }
        pending.commit(&self.path).map_err(|e| self.write_error(e))?;
        info!("Shield enable time recorded: {}", format_timestamp(at));
        Ok(())
    }

    /// Returns the recorded timestamp, or `None` if there isn't a usable
    /// one. An empty or malformed record is deleted on the way out.
    ///
    /// A record that exists but can't be read is an error. Callers that
    /// carry on regardless should treat it as absent.
    pub fn read(&self) -> Result<Option<NaiveDateTime>, RecordStoreError> {
        let bytes = self.contents().map_err(|source| RecordStoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        match classify(bytes) {
            RecordState::Valid(at) => Ok(Some(at)),
            RecordState::Malformed(content) => {
                warn!(
                    "Shield record {} holds {content:?}, not a timestamp. Removing it.",
                    self.path.display()
                );
                self.clear()?;
                Ok(None)
            }
            RecordState::Absent | RecordState::Unreadable(_) => Ok(None),
        }
    }

    /// Reads the record without changing anything.
    pub fn inspect(&self) -> RecordState {
        match self.contents() {
            Ok(bytes) => classify(bytes),
            Err(e) => RecordState::Unreadable(e.to_string()),
        }
    }

    /// Deletes the record. A record that isn't there is already cleared.
    pub fn clear(&self) -> Result<(), RecordStoreError> {
        match remove_file(&self.path) {
            Ok(()) => {
                info!("Shield record cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No shield record to clear");
                Ok(())
            }
            Err(e) => Err(RecordStoreError::Remove {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Raw bytes of the record, `None` if there is no record.
    fn contents(&self) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_error(&self, source: std::io::Error) -> RecordStoreError {
        RecordStoreError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn classify(bytes: Option<Vec<u8>>) -> RecordState {
    let Some(bytes) = bytes else {
        return RecordState::Absent;
    };
    let Ok(raw) = String::from_utf8(bytes) else {
        return RecordState::Malformed("<not UTF-8>".to_string());
    };
    let content = raw.trim();
    if content.is_empty() {
        return RecordState::Malformed(String::new());
    }
    match parse_timestamp(content) {
        Ok(at) => RecordState::Valid(at),
        Err(_) => RecordState::Malformed(content.to_string()),
    }
}

/// Temporary file beside the record. Removed on drop unless committed.
struct PendingRecord {
    path: PathBuf,
    committed: bool,
}

impl PendingRecord {
    fn new(record: &Path) -> Self {
        let mut name = record
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        Self {
            path: record.with_file_name(name),
            committed: false,
        }
    }

    fn commit(mut self, record: &Path) -> std::io::Result<()> {
        std::fs::rename(&self.path, record)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        if !self.committed {
            let _ = remove_file(&self.path); // Ignore result
        }
    }
}

/// Failures touching the record. The controller logs them and finishes
/// the pass, but the pass then exits non-zero.
#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("Unable to read shield record {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to write shield record {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to remove shield record {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}
