//! Persisted pre-mutation snapshots. One JSON record per patch request,
//! named by its id, under an injected directory; a record is written
//! once, restored at most once, and deleted on restore. The store is
//! naturally contention-free across sessions because ids are random.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::error::SandboxErr;

/// What one file looked like immediately before a patch touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Absolute path of the file within its workspace.
    pub path: PathBuf,
    pub existed: bool,
    /// Prior content, base64-encoded. Present iff `existed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
}

impl FileSnapshot {
    /// Capture `path` as it currently is on disk.
    pub fn capture(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self {
                path: path.to_path_buf(),
                existed: true,
                content_base64: Some(BASE64.encode(bytes)),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                path: path.to_path_buf(),
                existed: false,
                content_base64: None,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub workspace_root: PathBuf,
    pub files: Vec<FileSnapshot>,
    pub created_at: DateTime<Utc>,
}

/// Handle to the checkpoints directory. Injected wherever it is needed so
/// tests can point it at an ephemeral directory; there is no process-wide
/// singleton.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    max_retained: usize,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf, max_retained: usize) -> Self {
        Self { dir, max_retained }
    }

    /// Persist one record covering every snapshot of a single patch
    /// request, then prune the store back under the retention cap.
    pub fn save(&self, workspace_root: &Path, files: Vec<FileSnapshot>) -> Result<String> {
        fs::create_dir_all(&self.dir)?;
        let record = CheckpointRecord {
            id: Uuid::new_v4(),
            workspace_root: workspace_root.to_path_buf(),
            files,
            created_at: Utc::now(),
        };
        let path = self.record_path(&record.id.to_string());
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| SandboxErr::Io(std::io::Error::other(e)))?;
        fs::write(&path, json)?;
        tracing::debug!("saved checkpoint {} ({} files)", record.id, record.files.len());

        self.prune();
        Ok(record.id.to_string())
    }

    /// Restore one checkpoint and consume it. A missing record reports
    /// the user-facing expired error, not a generic I/O failure.
    pub fn restore_one(&self, id: &str) -> Result<()> {
        let record = self.load(id)?;
        apply_snapshots(&record.files)?;
        self.delete_record(id);
        Ok(())
    }

    /// Restore several checkpoints, newest first, so a chain of edits is
    /// unwound back to before the earliest one. All records are loaded up
    /// front; if any is missing the whole batch fails before any file is
    /// touched. Record deletion happens only after every snapshot list
    /// applied, and each deletion is independently best-effort.
    pub fn restore_many(&self, ids: &[String]) -> Result<()> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.load(id)?);
        }
        records.sort_by_key(|record| std::cmp::Reverse(record.created_at));

        for record in &records {
            apply_snapshots(&record.files)?;
        }
        for record in &records {
            self.delete_record(&record.id.to_string());
        }
        Ok(())
    }

    fn load(&self, id: &str) -> Result<CheckpointRecord> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxErr::CheckpointExpired(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| SandboxErr::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Best-effort GC: oldest records by modification time beyond the cap
    /// are removed; individual failures are logged, never fatal.
    fn prune(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let mut records: Vec<(PathBuf, std::time::SystemTime)> = entries
            .flatten()
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| {
                let mtime = entry.metadata().ok()?.modified().ok()?;
                Some((entry.path(), mtime))
            })
            .collect();
        if records.len() <= self.max_retained {
            return;
        }

        records.sort_by_key(|(_, mtime)| *mtime);
        let excess = records.len() - self.max_retained;
        for (path, _) in records.into_iter().take(excess) {
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!("could not prune checkpoint {}: {err}", path.display());
            }
        }
    }

    fn delete_record(&self, id: &str) {
        let path = self.record_path(id);
        if let Err(err) = fs::remove_file(&path) {
            tracing::warn!("could not delete checkpoint {id}: {err}");
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    #[cfg(test)]
    pub(crate) fn record_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Put every snapshotted file back: overwrite the ones that existed,
/// remove the ones that did not (ignoring "already gone").
fn apply_snapshots(files: &[FileSnapshot]) -> Result<()> {
    for snapshot in files {
        if snapshot.existed {
            let encoded = snapshot.content_base64.as_deref().unwrap_or_default();
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| SandboxErr::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            if let Some(parent) = snapshot.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&snapshot.path, bytes)?;
        } else {
            match fs::remove_file(&snapshot.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
