//! Durable dead-letter log
//!
//! Append-only JSON-lines file. Every append is written as a single
//! buffer and synced before returning. Deletion never edits in place: the
//! surviving lines are written to a sibling temp file, synced, and renamed
//! over the log, and the directory is synced so the rename itself persists.
//!
//! All file access goes through one async mutex, so appends, rewrites and
//! reads are serialized.

use crate::error::DeadLetterError;
use crate::record::{DeadLetterRecord, LogScan};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What a rewrite does with lines that fail to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CorruptLines {
    /// Carry them over unchanged
    Keep,
    /// Move them to the `.corrupt` side file
    Quarantine,
}

/// Outcome of a rewrite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Records deleted
    pub removed: usize,
    /// Corrupt lines moved to the quarantine file
    pub quarantined: usize,
}

/// Crash-safe store of permanently failed measurements
#[derive(Debug)]
pub struct DeadLetterStore {
    path: PathBuf,
    file: Mutex<File>,
    records: AtomicUsize,
    #[cfg(test)]
    fail_appends: AtomicBool,
}

impl DeadLetterStore {
    /// Open (or create) the log at `path`.
    ///
    /// A log whose last byte is not a newline was cut short by a crash; a
    /// newline is appended so later records start on a fresh line.
    ///
    /// # Errors
    /// Returns [`DeadLetterError::Io`] if the file or its directory cannot
    /// be created, read, or sealed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DeadLetterError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(DeadLetterError::io(parent))?;
        }

        let mut file = open_append(&path).await?;
        let contents = read_log(&path).await?;

        if contents.last().is_some_and(|b| *b != b'\n') {
            tracing::warn!(path = %path.display(), "dead-letter log ends mid-record, sealing tail");
            file.write_all(b"\n").await.map_err(DeadLetterError::io(&path))?;
            sync(&mut file, &path).await?;
        }

        let scan = LogScan::parse(&contents);
        if !scan.is_empty() {
            tracing::info!(
                path = %path.display(),
                records = scan.records.len(),
                corrupt = scan.corrupt.len(),
                "opened non-empty dead-letter log"
            );
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            records: AtomicUsize::new(scan.records.len()),
            #[cfg(test)]
            fail_appends: AtomicBool::new(false),
        })
    }

    /// Durably append one record
    ///
    /// # Errors
    /// Encoding or I/O failure; on error the record must be treated as not
    /// written.
    pub async fn append(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let line = record.encode_line()?;

        #[cfg(test)]
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(DeadLetterError::io(&self.path)(std::io::Error::other(
                "appends disabled",
            )));
        }

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(DeadLetterError::io(&self.path))?;
        sync(&mut file, &self.path).await?;
        drop(file);

        self.records.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(id = %record.id, tag = %record.tag, "dead-letter record appended");
        Ok(())
    }

    /// Read every line of the log
    ///
    /// # Errors
    /// I/O failure reading the file. Bad lines are not errors; they are
    /// reported in [`LogScan::corrupt`].
    pub async fn load(&self) -> Result<LogScan, DeadLetterError> {
        let _file = self.file.lock().await;
        Ok(LogScan::parse(&read_log(&self.path).await?))
    }

    /// Delete the records with the given ids, keeping everything else
    ///
    /// # Errors
    /// I/O failure during the rewrite; the previous log stays intact.
    pub async fn remove(&self, ids: &HashSet<Uuid>) -> Result<usize, DeadLetterError> {
        Ok(self.rewrite(ids, CorruptLines::Keep).await?.removed)
    }

    /// Delete the given records and move corrupt lines to the quarantine file
    ///
    /// # Errors
    /// I/O failure during the rewrite or the quarantine append.
    pub async fn compact(&self, ids: &HashSet<Uuid>) -> Result<Compaction, DeadLetterError> {
        self.rewrite(ids, CorruptLines::Quarantine).await
    }

    /// Number of valid records in the log
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }

    /// Check if the log holds no valid records
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Log location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Side file receiving corrupt lines
    #[must_use]
    pub fn quarantine_path(&self) -> PathBuf {
        with_suffix(&self.path, ".corrupt")
    }

    async fn rewrite(
        &self,
        ids: &HashSet<Uuid>,
        corrupt: CorruptLines,
    ) -> Result<Compaction, DeadLetterError> {
        let mut file = self.file.lock().await;
        let scan = LogScan::parse(&read_log(&self.path).await?);

        let removed = scan.records.iter().filter(|r| ids.contains(&r.id)).count();
        let quarantine = corrupt == CorruptLines::Quarantine && !scan.corrupt.is_empty();
        if removed == 0 && !quarantine {
            return Ok(Compaction::default());
        }

        if quarantine {
            let mut side = Vec::new();
            for line in &scan.corrupt {
                side.extend_from_slice(&line.raw);
                side.push(b'\n');
            }
            let side_path = self.quarantine_path();
            let mut side_file = open_append(&side_path).await?;
            side_file
                .write_all(&side)
                .await
                .map_err(DeadLetterError::io(&side_path))?;
            sync(&mut side_file, &side_path).await?;
        }

        let mut body = Vec::new();
        let mut kept = 0usize;
        for record in scan.records.iter().filter(|r| !ids.contains(&r.id)) {
            body.extend_from_slice(record.encode_line()?.as_bytes());
            kept += 1;
        }
        if corrupt == CorruptLines::Keep {
            for line in &scan.corrupt {
                body.extend_from_slice(&line.raw);
                body.push(b'\n');
            }
        }

        let tmp_path = with_suffix(&self.path, ".tmp");
        let mut tmp = File::create(&tmp_path)
            .await
            .map_err(DeadLetterError::io(&tmp_path))?;
        tmp.write_all(&body)
            .await
            .map_err(DeadLetterError::io(&tmp_path))?;
        tmp.flush().await.map_err(DeadLetterError::io(&tmp_path))?;
        tmp.sync_all().await.map_err(DeadLetterError::io(&tmp_path))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(DeadLetterError::io(&self.path))?;
        sync_parent(&self.path).await?;
        *file = open_append(&self.path).await?;
        self.records.store(kept, Ordering::SeqCst);

        let quarantined = if quarantine { scan.corrupt.len() } else { 0 };
        tracing::info!(
            path = %self.path.display(),
            removed,
            remaining = kept,
            quarantined,
            "dead-letter log compacted"
        );
        Ok(Compaction {
            removed,
            quarantined,
        })
    }
}

async fn open_append(path: &Path) -> Result<File, DeadLetterError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(DeadLetterError::io(path))
}

async fn read_log(path: &Path) -> Result<Vec<u8>, DeadLetterError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(DeadLetterError::io(path)(e)),
    }
}

async fn sync(file: &mut File, path: &Path) -> Result<(), DeadLetterError> {
    file.flush().await.map_err(DeadLetterError::io(path))?;
    file.sync_data().await.map_err(DeadLetterError::io(path))
}

/// Flush directory metadata so a completed rename survives a crash
#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<(), DeadLetterError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)
        .await
        .map_err(DeadLetterError::io(dir))?
        .sync_all()
        .await
        .map_err(DeadLetterError::io(dir))
}

// directories cannot be opened for syncing here
#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<(), DeadLetterError> {
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
