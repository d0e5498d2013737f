//! Operation-scoped snapshots and rollback.
//!
//! Every apply runs under one operation id. Each file is copied verbatim
//! into the operation directory, keyed by its path relative to the
//! metadata root, before it is overwritten; a manifest records what the
//! operation touched so rollback knows what to expect. Snapshots are kept
//! until explicitly pruned.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::constants::BACKUPS_DIR;
use crate::error::{FlsError, Result};

const MANIFEST: &str = "manifest.csv";

/// Groups all snapshots taken by a single apply
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OperationId(String);

impl OperationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file snapshot under an operation
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub operation: OperationId,
    pub original: PathBuf,
    pub snapshot: PathBuf,
    pub timestamp: DateTime<Local>,
}

/// Outcome of restoring one operation. Restorable files are restored even
/// when others are missing or fail.
#[derive(Debug, Default)]
pub struct RollbackResult {
    pub files_restored: Vec<PathBuf>,
    pub files_missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, FlsError)>,
}

/// Snapshot store rooted next to the metadata it protects
#[derive(Debug, Clone)]
pub struct BackupManager {
    meta: PathBuf,
    root: PathBuf,
}

impl BackupManager {
    /// `meta` is the metadata base the snapshots are keyed against;
    /// `base` is the tool files directory the backups live under.
    pub fn new(meta: &Path, base: &Path) -> Self {
        BackupManager { meta: meta.to_path_buf(), root: base.join(BACKUPS_DIR) }
    }

    pub fn meta_root(&self) -> &Path {
        &self.meta
    }

    pub fn operation_dir(&self, op: &OperationId) -> PathBuf {
        self.root.join(op.as_str())
    }

    /// Start a new operation: timestamped id plus a sequence suffix when
    /// two operations share a second.
    pub fn begin_operation(&self, reason: &str) -> Result<OperationId> {
        fs::create_dir_all(&self.root)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{}_{}", stamp, reason);
        for seq in 1..1000u32 {
            let name = if seq == 1 { base.clone() } else { format!("{}-{}", base, seq) };
            let dir = self.root.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    let mut w = csv::Writer::from_path(dir.join(MANIFEST))
                        .map_err(csv_io)?;
                    w.write_record(["path", "timestamp"]).map_err(csv_io)?;
                    w.flush()?;
                    debug!(operation = %name, "backup operation started");
                    return Ok(OperationId(name));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(FlsError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not allocate a unique operation directory",
        )))
    }

    /// Copy the file's current content into the operation directory before
    /// it is overwritten.
    pub fn snapshot(&self, op: &OperationId, file: &Path) -> Result<BackupRecord> {
        let rel = self.relative(file);
        let dest = self.operation_dir(op).join(&rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(file, &dest)?;
        let timestamp = Local::now();
        self.append_manifest(op, &rel, &timestamp)?;
        debug!(operation = %op, file = %file.display(), "snapshot taken");
        Ok(BackupRecord {
            operation: op.clone(),
            original: file.to_path_buf(),
            snapshot: dest,
            timestamp,
        })
    }

    /// All known operations, most recent first
    pub fn list_operations(&self) -> Result<Vec<OperationId>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ops = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                ops.push(OperationId(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        ops.sort();
        ops.reverse();
        Ok(ops)
    }

    /// Restore every file recorded under the operation. Missing snapshots
    /// and per-file restore failures are reported without blocking the
    /// rest; originals deleted out-of-band are recreated.
    pub fn rollback(&self, op: &OperationId) -> Result<RollbackResult> {
        let dir = self.operation_dir(op);
        if !dir.is_dir() {
            return Err(FlsError::Rollback {
                path: dir,
                detail: format!("operation '{}' has no backup directory", op),
            });
        }
        let mut result = RollbackResult::default();
        for rel in self.read_manifest(&dir)? {
            let snapshot = dir.join(&rel);
            let original = self.meta.join(&rel);
            if !snapshot.is_file() {
                warn!(operation = %op, file = %original.display(), "snapshot missing");
                result.files_missing.push(original);
                continue;
            }
            let restore = || -> std::io::Result<()> {
                if let Some(parent) = original.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&snapshot, &original)?;
                Ok(())
            };
            match restore() {
                Ok(()) => result.files_restored.push(original),
                Err(e) => result.failed.push((
                    original.clone(),
                    FlsError::Rollback { path: original, detail: e.to_string() },
                )),
            }
        }
        info!(
            operation = %op,
            restored = result.files_restored.len(),
            missing = result.files_missing.len(),
            failed = result.failed.len(),
            "rollback finished"
        );
        Ok(result)
    }

    /// Delete an operation's snapshots. There is no automatic expiry.
    pub fn prune(&self, op: &OperationId) -> Result<()> {
        let dir = self.operation_dir(op);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    fn relative(&self, file: &Path) -> PathBuf {
        file.strip_prefix(&self.meta)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| file.file_name().map(PathBuf::from).unwrap_or_default())
    }

    fn append_manifest(&self, op: &OperationId, rel: &Path, timestamp: &DateTime<Local>) -> Result<()> {
        let file = fs::OpenOptions::new()
            .append(true)
            .open(self.operation_dir(op).join(MANIFEST))?;
        let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        w.write_record([
            rel.to_string_lossy().as_ref(),
            &timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        ])
        .map_err(csv_io)?;
        w.flush()?;
        Ok(())
    }

    fn read_manifest(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let path = dir.join(MANIFEST);
        if !path.is_file() {
            return Err(FlsError::Rollback {
                path,
                detail: "backup manifest is missing".into(),
            });
        }
        let mut rdr = csv::Reader::from_path(&path).map_err(csv_io)?;
        let mut files = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(csv_io)?;
            if let Some(rel) = record.get(0) {
                files.push(PathBuf::from(rel));
            }
        }
        Ok(files)
    }
}

fn csv_io(e: csv::Error) -> FlsError {
    FlsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}
