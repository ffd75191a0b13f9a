//! Where ledgers and tested markers live, and how they are written.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crc32fast::Hasher as Crc32;
use tracing::{debug, warn};

use crate::config::LedgerFormat;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::fsio::{FileStat, FileSystem, ReadStrategy};
use crate::ledger::Ledger;

/// Paths at or above this many characters get a shortened ledger name.
pub const MAX_PATH_CHARS: usize = 258;

const TMP_CLEANUP_DELAY: Duration = Duration::from_millis(50);

fn too_long(p: &Path) -> bool {
    p.to_string_lossy().chars().count() >= MAX_PATH_CHARS
}

fn name_hash(name: &str) -> u32 {
    let mut h = Crc32::new();
    h.update(name.as_bytes());
    h.finalize()
}

/// `<dir>/<ledger_dir>/<file name><ext>`, shortened for long paths.
pub fn ledger_path(data: &Path, ledger_dir: &str, ext: &str) -> PathBuf {
    let base = data.parent().unwrap_or_else(|| Path::new("")).join(ledger_dir);
    let name = data.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let full = base.join(format!("{name}{ext}"));
    if !too_long(&full) {
        return full;
    }
    let first: String = name.chars().take(1).collect();
    let hash = name_hash(&name);
    let short = base.join(format!("{first}{hash}{ext}"));
    if !too_long(&short) {
        return short;
    }
    base.join(format!("{first}{}{ext}", hash % 100))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Zero-byte marker whose mtime records the last successful test.
pub fn tested_marker_path(ledger_path: &Path) -> PathBuf {
    with_suffix(ledger_path, "ed")
}

/// Staging path for writes that replace `target`.
pub fn tmp_path(target: &Path) -> PathBuf {
    with_suffix(target, ".tmp")
}

/// Best-effort removal of a staging file after a failed write.
pub fn cleanup_tmp(fs: &dyn FileSystem, tmp: &Path) {
    thread::sleep(TMP_CLEANUP_DELAY);
    if let Err(e) = fs.remove(tmp) {
        debug!(path = %tmp.display(), error = %e, "could not remove temporary file");
    }
}

fn ensure_parent(fs: &dyn FileSystem, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs.create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
    }
    Ok(())
}

/// What a data file's ledger looks like right now.
#[derive(Debug, Clone)]
pub enum LedgerStatus {
    Missing,
    Unreadable,
    /// Readable, but built for another length or mtime.
    Stale,
    Valid(Ledger),
}

impl LedgerStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, LedgerStatus::Valid(_))
    }

    pub fn into_ledger(self) -> Option<Ledger> {
        match self {
            LedgerStatus::Valid(l) => Some(l),
            _ => None,
        }
    }
}

/// Read a ledger, retrying once unbuffered when the buffered read fails.
pub fn read_ledger(fs: &dyn FileSystem, ledger_path: &Path) -> Result<Option<Ledger>> {
    if !fs.exists(ledger_path) {
        return Ok(None);
    }
    let mut last_err = None;
    for strategy in ReadStrategy::FALLBACK_ORDER {
        let attempt = fs
            .open_read(ledger_path, strategy)
            .map_err(|e| SyncError::io(ledger_path, e))
            .and_then(|mut r| Ledger::read_from(&mut r));
        match attempt {
            Ok(l) => return Ok(Some(l)),
            Err(e) => {
                debug!(path = %ledger_path.display(), ?strategy, error = %e, "ledger read failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| SyncError::LedgerFormat("unreadable".into())))
}

pub fn ledger_status(cx: &SyncContext, ledger_path: &Path, stat: &FileStat) -> LedgerStatus {
    match read_ledger(cx.fs.as_ref(), ledger_path) {
        Ok(None) => LedgerStatus::Missing,
        Ok(Some(l)) if l.is_valid_for(stat) => LedgerStatus::Valid(l),
        Ok(Some(_)) => LedgerStatus::Stale,
        Err(e) => {
            warn!(path = %ledger_path.display(), error = %e, "ledger unreadable");
            LedgerStatus::Unreadable
        }
    }
}

fn finish_sidecar(fs: &dyn FileSystem, path: &Path, data_mtime: DateTime<Utc>) -> Result<()> {
    fs.set_modified(path, data_mtime).map_err(|e| SyncError::io(path, e))?;
    if let Err(e) = fs.set_hidden_system(path) {
        debug!(path = %path.display(), error = %e, "could not mark ledger hidden");
    }
    Ok(())
}

/// Write `ledger` via `<path>.tmp`, then pin the sidecar's mtime to the data
/// file's.
pub fn save_ledger(
    cx: &SyncContext,
    ledger: &Ledger,
    ledger_path: &Path,
    data_mtime: DateTime<Utc>,
) -> Result<()> {
    let fs = cx.fs.as_ref();
    ensure_parent(fs, ledger_path)?;
    let tmp = tmp_path(ledger_path);
    let written = (|| {
        let mut w = fs.create(&tmp).map_err(|e| SyncError::io(&tmp, e))?;
        match cx.settings.ledger_format {
            LedgerFormat::Current => ledger.save_to(&mut w)?,
            LedgerFormat::Legacy => ledger.save_to_legacy(&mut w)?,
        }
        w.flush().map_err(|e| SyncError::io(&tmp, e))?;
        w.sync().map_err(|e| SyncError::io(&tmp, e))?;
        drop(w);
        fs.rename(&tmp, ledger_path).map_err(|e| SyncError::io(ledger_path, e))
    })();
    if let Err(e) = written {
        cleanup_tmp(fs, &tmp);
        return Err(e);
    }
    finish_sidecar(fs, ledger_path, data_mtime)
}

/// Copy an existing ledger file to another location.
pub fn clone_ledger(
    cx: &SyncContext,
    from: &Path,
    to: &Path,
    data_mtime: DateTime<Utc>,
) -> Result<()> {
    let fs = cx.fs.as_ref();
    ensure_parent(fs, to)?;
    let tmp = tmp_path(to);
    let copied = fs
        .copy(from, &tmp)
        .map_err(|e| SyncError::io(from, e))
        .and_then(|_| fs.rename(&tmp, to).map_err(|e| SyncError::io(to, e)));
    if let Err(e) = copied {
        cleanup_tmp(fs, &tmp);
        return Err(e);
    }
    finish_sidecar(fs, to, data_mtime)
}

/// Remove a file's ledger and tested marker, ignoring missing ones.
pub fn remove_ledger(cx: &SyncContext, ledger_path: &Path) -> Result<()> {
    let fs = cx.fs.as_ref();
    for p in [ledger_path.to_path_buf(), tested_marker_path(ledger_path)] {
        if fs.exists(&p) {
            fs.remove(&p).map_err(|e| SyncError::io(&p, e))?;
        }
    }
    Ok(())
}

/// Create or refresh the tested marker next to `ledger_path`.
pub fn touch_tested_marker(cx: &SyncContext, ledger_path: &Path) -> Result<()> {
    let fs = cx.fs.as_ref();
    let marker = tested_marker_path(ledger_path);
    ensure_parent(fs, &marker)?;
    if !fs.exists(&marker) {
        let mut w = fs.create(&marker).map_err(|e| SyncError::io(&marker, e))?;
        w.flush().map_err(|e| SyncError::io(&marker, e))?;
    }
    finish_sidecar(fs, &marker, cx.now())
}
