use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::filetime::file_times_equal;
use crate::fsio::{FileStat, WriteStream};
use crate::ledger::Ledger;
use crate::report::Report;
use crate::repair::copy_repair_single_file;
use crate::scan::BlockReader;
use crate::sidecar;
use crate::verify::stat_existing;

fn ensure_unchanged(cx: &SyncContext, path: &Path, before: &FileStat) -> Result<()> {
    let after = stat_existing(cx, path)?;
    if after.len != before.len || !file_times_equal(&after.modified, &before.modified) {
        return Err(SyncError::ChangedDuringScan(path.to_path_buf()));
    }
    Ok(())
}

/// Stream `path` once and feed every block to a fresh ledger. With `copy_to`
/// each block is also written there.
fn build(
    cx: &SyncContext,
    path: &Path,
    stat: &FileStat,
    mut copy_to: Option<&mut (dyn WriteStream + '_)>,
) -> Result<Ledger> {
    let mut ledger = Ledger::for_file(stat, cx.settings.geometry);
    let mut reader = BlockReader::open(cx, path, stat.len)?;
    let mut buf = cx.block();
    for index in 0..reader.block_count() {
        cx.check_cancelled()?;
        let n = reader.block_len(index);
        if !reader.read(index, &mut buf) {
            cx.progress.inc_bad_block();
            // A ledger over a dummy block would bless the damage.
            if copy_to.is_some() || cx.settings.fail_fast {
                break;
            }
            continue;
        }
        if reader.unreadable() == 0 {
            ledger.analyze_for_info_collection(&buf, index)?;
        }
        if let Some(w) = copy_to.as_deref_mut() {
            buf.write_first(w, n).map_err(|e| SyncError::io(path, e))?;
        }
        cx.progress.add_block(n as u64);
    }
    if reader.unreadable() > 0 {
        return Err(SyncError::Unreadable { path: path.to_path_buf(), blocks: reader.unreadable() });
    }
    ensure_unchanged(cx, path, stat)?;
    Ok(ledger)
}

/// Build the ledger of `path` from scratch and save it next to the file.
pub fn create_saved_info(cx: &SyncContext, path: &Path) -> Result<Ledger> {
    let stat = stat_existing(cx, path)?;
    cx.progress.set_stage("create");
    let ledger = build(cx, path, &stat, None)?;
    sidecar::save_ledger(cx, &ledger, &cx.ledger_path(path), stat.modified)?;
    info!(path = %path.display(), blocks = ledger.block_count(), "ledger created");
    Ok(ledger)
}

/// Copy `source` to `target` and build its ledger in the same pass. The
/// ledger is saved for the target and, with `save_source_ledger`, for the
/// source as well.
///
/// An unreadable source block makes a trustworthy ledger impossible; the
/// copy then falls back to [`copy_repair_single_file`] and asks for a
/// rebuild.
pub fn create_saved_info_and_copy(
    cx: &SyncContext,
    source: &Path,
    target: &Path,
    save_source_ledger: bool,
) -> Result<Report> {
    let stat = stat_existing(cx, source)?;
    cx.progress.set_stage("create+copy");
    if let Some(parent) = target.parent() {
        cx.fs.create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }
    let tmp = sidecar::tmp_path(target);
    let built = cx.fs.create(&tmp).map_err(|e| SyncError::io(&tmp, e)).and_then(|mut w| {
        let ledger = build(cx, source, &stat, Some(&mut *w))?;
        w.flush().map_err(|e| SyncError::io(&tmp, e))?;
        w.sync().map_err(|e| SyncError::io(&tmp, e))?;
        drop(w);
        cx.fs.rename(&tmp, target).map_err(|e| SyncError::io(target, e))?;
        Ok(ledger)
    });
    let ledger = match built {
        Ok(l) => l,
        Err(e) => {
            sidecar::cleanup_tmp(cx.fs.as_ref(), &tmp);
            return match e {
                SyncError::Unreadable { .. } => {
                    warn!(path = %source.display(), error = %e, "cannot build ledger, copying with repair");
                    copy_repair_single_file(cx, source, target, false)
                }
                e => Err(e),
            };
        }
    };
    cx.fs.set_modified(target, stat.modified).map_err(|e| SyncError::io(target, e))?;
    if save_source_ledger {
        sidecar::save_ledger(cx, &ledger, &cx.ledger_path(source), stat.modified)?;
    }
    sidecar::save_ledger(cx, &ledger, &cx.ledger_path(target), stat.modified)?;
    info!(source = %source.display(), target = %target.display(), "copied with new ledger");
    Ok(Report::ok())
}
