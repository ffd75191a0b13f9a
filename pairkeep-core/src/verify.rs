use std::collections::BTreeSet;
use std::path::Path;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::fsio::FileStat;
use crate::ledger::Ledger;
use crate::report::{Outcome, Report};
use crate::restore::RestoreInfo;
use crate::scan::BlockReader;
use crate::sidecar::{self, LedgerStatus};

/// Confirmed-good span below which a file is always scanned.
pub const SKIP_GRACE_DAYS: i64 = 2 * 366;
/// Span over which the skip probability ramps from 0 to 1.
pub const SKIP_RAMP_DAYS: i64 = 5 * 366;

/// Probability that a file confirmed good `days` after its last change skips
/// its physical scan.
pub fn skip_probability(days: i64) -> f64 {
    ((days - SKIP_GRACE_DAYS) as f64 / SKIP_RAMP_DAYS as f64).clamp(0.0, 1.0)
}

/// One draw of the skip heuristic.
pub fn draw_skip<R: Rng + ?Sized>(rng: &mut R, days: i64) -> bool {
    let over = days - SKIP_GRACE_DAYS;
    over > 0 && rng.gen_range(0..SKIP_RAMP_DAYS) < over
}

/// Whether the physical scan of a file may be skipped this time.
pub fn should_skip(cx: &SyncContext, stat: &FileStat, ledger_path: &Path) -> bool {
    if !cx.settings.skip_recently_tested {
        return false;
    }
    let marker = sidecar::tested_marker_path(ledger_path);
    let tested = match cx.fs.stat(&marker) {
        Ok(Some(m)) => m.modified,
        _ => return false,
    };
    if tested <= stat.modified {
        return false;
    }
    let days = (tested - stat.modified).num_days();
    cx.shared.with_rng(|rng| draw_skip(rng, days))
}

pub(crate) fn stat_existing(cx: &SyncContext, path: &Path) -> Result<FileStat> {
    cx.fs
        .stat(path)
        .map_err(|e| SyncError::io(path, e))?
        .ok_or_else(|| SyncError::NotFound(path.to_path_buf()))
}

/// Per-block findings of one pass over a file against its ledger.
#[derive(Debug, Default)]
pub(crate) struct LedgerScan {
    pub unreadable: BTreeSet<u64>,
    /// Readable, but not what the ledger expects.
    pub mismatched: BTreeSet<u64>,
    pub not_restored: u64,
    pub fixes: Vec<RestoreInfo>,
    /// Fail-fast stopped the pass; `fixes` is empty.
    pub stopped_early: bool,
    pub ledger_damaged: bool,
}

impl LedgerScan {
    pub fn bad_blocks(&self) -> u64 {
        (self.unreadable.len() + self.mismatched.len()) as u64
    }
}

pub(crate) fn scan_with_ledger(
    cx: &SyncContext,
    path: &Path,
    stat: &FileStat,
    ledger: &mut Ledger,
) -> Result<LedgerScan> {
    let mut reader = BlockReader::open(cx, path, stat.len)?;
    let mut buf = cx.block();
    let mut scan = LedgerScan::default();
    ledger.start_restore();
    for index in 0..reader.block_count() {
        cx.check_cancelled()?;
        if reader.read(index, &mut buf) {
            if !ledger.analyze_for_test_or_restore(&buf, index) {
                debug!(path = %path.display(), block = index, "checksum mismatch");
                scan.mismatched.insert(index);
                cx.progress.inc_bad_block();
            }
        } else {
            scan.unreadable.insert(index);
            cx.progress.inc_bad_block();
        }
        cx.progress.add_block(reader.block_len(index) as u64);
        if cx.settings.fail_fast && scan.bad_blocks() > 0 {
            scan.stopped_early = true;
            return Ok(scan);
        }
    }
    let (not_restored, fixes) = ledger.end_restore();
    scan.not_restored = not_restored;
    scan.fixes = fixes;
    scan.ledger_damaged = !ledger.verify_integrity_after_restore_test();
    Ok(scan)
}

/// Read every block once; returns the number of unreadable ones.
pub(crate) fn scan_readability(cx: &SyncContext, path: &Path, len: u64) -> Result<u64> {
    let mut reader = BlockReader::open(cx, path, len)?;
    let mut buf = cx.block();
    for index in 0..reader.block_count() {
        cx.check_cancelled()?;
        if !reader.read(index, &mut buf) {
            cx.progress.inc_bad_block();
            if cx.settings.fail_fast {
                break;
            }
        }
        cx.progress.add_block(reader.block_len(index) as u64);
    }
    Ok(reader.unreadable())
}

/// Check a file against its ledger without writing to it.
///
/// Without a usable ledger only readability is checked and the report asks
/// for a rebuild. With `may_write`, a clean pass refreshes the tested marker.
pub fn test_single_file(cx: &SyncContext, path: &Path, may_write: bool) -> Result<Report> {
    let stat = stat_existing(cx, path)?;
    let ledger_path = cx.ledger_path(path);
    if should_skip(cx, &stat, &ledger_path) {
        info!(path = %path.display(), "recently confirmed, skipping test");
        return Ok(Report::skipped());
    }
    cx.progress.set_stage("test");
    match sidecar::ledger_status(cx, &ledger_path, &stat) {
        LedgerStatus::Valid(mut ledger) => {
            let scan = scan_with_ledger(cx, path, &stat, &mut ledger)?;
            let rebuild = scan.ledger_damaged || ledger.needs_rebuild();
            let bad = scan.bad_blocks();
            if bad > 0 {
                let recoverable = scan.fixes.iter().filter(|f| !f.not_recoverable).count();
                warn!(path = %path.display(), bad, recoverable, "file failed its test");
                // Keep the ledger: it is the only record of the good content.
                return Ok(Report::with_outcome(Outcome::Failed { bad_blocks: bad }));
            }
            if may_write && cx.settings.mark_tested && !rebuild {
                mark_tested(cx, path);
            }
            Ok(Report::ok().rebuild(rebuild))
        }
        status => {
            debug!(path = %path.display(), ?status, "no usable ledger, checking readability");
            let bad = scan_readability(cx, path, stat.len)?;
            let outcome = if bad == 0 { Outcome::Ok } else { Outcome::Failed { bad_blocks: bad } };
            if bad > 0 {
                warn!(path = %path.display(), bad, "file has unreadable blocks");
            }
            Ok(Report::with_outcome(outcome).rebuild(true))
        }
    }
}

/// Create or bump the tested marker of `data`.
pub fn create_or_update_file_checked(cx: &SyncContext, data: &Path) -> Result<()> {
    sidecar::touch_tested_marker(cx, &cx.ledger_path(data))
}

pub(crate) fn mark_tested(cx: &SyncContext, data: &Path) {
    if let Err(e) = create_or_update_file_checked(cx, data) {
        warn!(path = %data.display(), error = %e, "could not update tested marker");
    }
}
