use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::block::{BlockBuffer, BLOCK_SIZE};
use crate::context::{ReadOrder, SyncContext};
use crate::error::{Result, SyncError};
use crate::filetime::last_chance_time;
use crate::fsio::FileStat;
use crate::ledger::Ledger;
use crate::report::{CrossReport, Outcome, Report};
use crate::restore::RestoreInfo;
use crate::scan::{block_len, BlockReader};
use crate::sidecar::{self, LedgerStatus};
use crate::verify::{mark_tested, scan_readability, scan_with_ledger, should_skip, stat_existing};

/// Write `fixes` into `path` in place, then put its mtime back.
fn apply_fixes<'a>(
    cx: &SyncContext,
    path: &Path,
    stat: &FileStat,
    fixes: impl IntoIterator<Item = &'a RestoreInfo>,
) -> Result<usize> {
    let mut w = cx.fs.open_update(path).map_err(|e| SyncError::io(path, e))?;
    let mut written = 0;
    for fix in fixes {
        cx.check_cancelled()?;
        fix.apply(&mut *w, stat.len).map_err(|e| SyncError::io(path, e))?;
        written += 1;
    }
    w.flush().map_err(|e| SyncError::io(path, e))?;
    w.sync().map_err(|e| SyncError::io(path, e))?;
    drop(w);
    cx.fs.set_modified(path, stat.modified).map_err(|e| SyncError::io(path, e))?;
    Ok(written)
}

fn readability_report(cx: &SyncContext, path: &Path, stat: &FileStat) -> Result<Report> {
    let bad = scan_readability(cx, path, stat.len)?;
    if bad > 0 {
        warn!(path = %path.display(), bad, "unreadable blocks and no usable ledger");
    }
    let outcome = if bad == 0 { Outcome::Ok } else { Outcome::Failed { bad_blocks: bad } };
    Ok(Report::with_outcome(outcome).rebuild(true))
}

/// Test a file and write every fix its ledger yields back in place.
///
/// Blocks that cannot be reconstructed are zero-filled when unreadable and
/// left alone when they were readable but wrong.
pub fn test_and_repair_single_file(cx: &SyncContext, path: &Path) -> Result<Report> {
    let stat = stat_existing(cx, path)?;
    let ledger_path = cx.ledger_path(path);
    if should_skip(cx, &stat, &ledger_path) {
        info!(path = %path.display(), "recently confirmed, skipping test");
        return Ok(Report::skipped());
    }
    cx.progress.set_stage("repair");
    let mut ledger = match sidecar::ledger_status(cx, &ledger_path, &stat) {
        LedgerStatus::Valid(l) => l,
        status => {
            debug!(path = %path.display(), ?status, "no usable ledger, checking readability");
            return readability_report(cx, path, &stat);
        }
    };
    let scan = scan_with_ledger(cx, path, &stat, &mut ledger)?;
    let rebuild = scan.ledger_damaged || ledger.needs_rebuild();
    let bad = scan.bad_blocks();
    if bad == 0 {
        if cx.settings.mark_tested && !rebuild {
            mark_tested(cx, path);
        }
        return Ok(Report::ok().rebuild(rebuild));
    }
    if scan.stopped_early {
        return Ok(Report::with_outcome(Outcome::Failed { bad_blocks: bad }));
    }

    let writes: Vec<&RestoreInfo> = scan
        .fixes
        .iter()
        .filter(|f| !(f.not_recoverable && scan.mismatched.contains(&f.block_index())))
        .collect();
    let written = apply_fixes(cx, path, &stat, writes)?;
    let outcome = if scan.not_restored == 0 {
        Outcome::Repaired
    } else {
        Outcome::PartiallyRecovered { lost_bytes: scan.not_restored }
    };
    info!(path = %path.display(), bad, written, lost = scan.not_restored, "repaired in place");
    Ok(Report::with_outcome(outcome).rebuild(rebuild && scan.not_restored == 0))
}

#[derive(Default)]
struct CopyPass {
    bad: BTreeSet<u64>,
    fixed: BTreeSet<u64>,
    recovered: Vec<RestoreInfo>,
    ledger_damaged: bool,
}

fn copy_pass(
    cx: &SyncContext,
    source: &Path,
    stat: &FileStat,
    mut ledger: Option<&mut Ledger>,
    tmp: &Path,
) -> Result<CopyPass> {
    let mut reader = BlockReader::open(cx, source, stat.len)?;
    let mut w = cx.fs.create(tmp).map_err(|e| SyncError::io(tmp, e))?;
    let mut buf = cx.block();
    let mut pass = CopyPass::default();
    if let Some(l) = ledger.as_deref_mut() {
        l.start_restore();
    }
    for index in 0..reader.block_count() {
        cx.check_cancelled()?;
        let n = reader.block_len(index);
        if reader.read(index, &mut buf) {
            if let Some(l) = ledger.as_deref_mut() {
                if !l.analyze_for_test_or_restore(&buf, index) {
                    pass.bad.insert(index);
                    cx.progress.inc_bad_block();
                }
            }
        } else {
            // Dummy block until the ledger says otherwise.
            pass.bad.insert(index);
            cx.progress.inc_bad_block();
        }
        buf.write_first(&mut *w, n).map_err(|e| SyncError::io(tmp, e))?;
        cx.progress.add_block(n as u64);
    }
    if let Some(l) = ledger {
        let (_, fixes) = l.end_restore();
        for fix in fixes.into_iter().filter(|f| !f.not_recoverable) {
            fix.apply(&mut *w, stat.len).map_err(|e| SyncError::io(tmp, e))?;
            pass.fixed.insert(fix.block_index());
            pass.recovered.push(fix);
        }
        pass.ledger_damaged = !l.verify_integrity_after_restore_test();
    }
    w.flush().map_err(|e| SyncError::io(tmp, e))?;
    w.sync().map_err(|e| SyncError::io(tmp, e))?;
    Ok(pass)
}

/// Copy `source` over `target` through `<target>.tmp`, patching bad source
/// blocks from the ledger or with a dummy block.
///
/// A copy that still carries damage gets a quality-as-timestamp mtime so any
/// better copy replaces it later. With `repair_source` the ledger fixes are
/// also written back into the source.
pub fn copy_repair_single_file(
    cx: &SyncContext,
    source: &Path,
    target: &Path,
    repair_source: bool,
) -> Result<Report> {
    let stat = stat_existing(cx, source)?;
    cx.progress.set_stage("copy");
    let mut ledger = sidecar::ledger_status(cx, &cx.ledger_path(source), &stat).into_ledger();
    let had_ledger = ledger.is_some();
    if let Some(parent) = target.parent() {
        cx.fs.create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }
    let tmp = sidecar::tmp_path(target);
    let pass = copy_pass(cx, source, &stat, ledger.as_mut(), &tmp)
        .and_then(|pass| cx.fs.rename(&tmp, target).map(|_| pass).map_err(|e| SyncError::io(target, e)));
    let pass = match pass {
        Ok(p) => p,
        Err(e) => {
            sidecar::cleanup_tmp(cx.fs.as_ref(), &tmp);
            return Err(e);
        }
    };

    let residual: Vec<u64> = pass.bad.difference(&pass.fixed).copied().collect();
    let lost: u64 = residual.iter().map(|&i| block_len(stat.len, i) as u64).sum();
    let mtime = if residual.is_empty() {
        stat.modified
    } else {
        warn!(
            source = %source.display(),
            target = %target.display(),
            errors = residual.len(),
            "copy still damaged, marking it as last chance"
        );
        last_chance_time(residual.len() as u64)
    };
    cx.fs.set_modified(target, mtime).map_err(|e| SyncError::io(target, e))?;

    if repair_source && !pass.recovered.is_empty() {
        let n = apply_fixes(cx, source, &stat, &pass.recovered)?;
        info!(path = %source.display(), blocks = n, "repaired source while copying");
    }

    let outcome = match (pass.bad.is_empty(), residual.is_empty()) {
        (true, _) => Outcome::Ok,
        (false, true) => Outcome::Repaired,
        (false, false) => Outcome::PartiallyRecovered { lost_bytes: lost },
    };
    let stale = pass.ledger_damaged || ledger.as_ref().is_some_and(Ledger::needs_rebuild);
    let rebuild = !had_ledger || (stale && residual.is_empty());
    Ok(Report::with_outcome(outcome).rebuild(rebuild))
}

struct Side<'a> {
    path: &'a Path,
    stat: FileStat,
    ledger: Option<Ledger>,
    writable: bool,
    rebuild: bool,
    unreadable: BTreeSet<u64>,
    mismatched: BTreeSet<u64>,
    /// Bytes from the other copy that pass this side's checksum.
    cross: BTreeMap<u64, BlockBuffer>,
    /// Bytes from the other copy for blocks unreadable here.
    raw: BTreeMap<u64, BlockBuffer>,
    fixes: BTreeMap<u64, RestoreInfo>,
}

impl<'a> Side<'a> {
    fn new(cx: &SyncContext, path: &'a Path, stat: FileStat, writable: bool) -> Self {
        let status = sidecar::ledger_status(cx, &cx.ledger_path(path), &stat);
        let rebuild = !status.is_valid();
        Self {
            path,
            stat,
            ledger: status.into_ledger(),
            writable,
            rebuild,
            unreadable: BTreeSet::new(),
            mismatched: BTreeSet::new(),
            cross: BTreeMap::new(),
            raw: BTreeMap::new(),
            fixes: BTreeMap::new(),
        }
    }

    fn bad_blocks(&self) -> u64 {
        (self.unreadable.len() + self.mismatched.len()) as u64
    }

    fn observe(
        &mut self,
        cx: &SyncContext,
        index: u64,
        own: Option<&BlockBuffer>,
        other: Option<&BlockBuffer>,
        equal: bool,
    ) {
        if own.is_none() {
            self.unreadable.insert(index);
            cx.progress.inc_bad_block();
        }
        let Some(ledger) = self.ledger.as_mut() else {
            if let (None, Some(o)) = (own, other) {
                self.raw.insert(index, o.clone());
            }
            return;
        };
        let matches = own.is_some_and(|b| ledger.analyze_for_test_or_restore(b, index));
        if own.is_some() && !matches {
            self.mismatched.insert(index);
            cx.progress.inc_bad_block();
        }
        if matches || equal {
            return;
        }
        match other {
            Some(o) if ledger.analyze_for_test_or_restore(o, index) => {
                self.cross.insert(index, o.clone());
            }
            Some(o) if own.is_none() => {
                self.raw.insert(index, o.clone());
            }
            _ => {}
        }
    }

    fn finish(&mut self) {
        if let Some(l) = self.ledger.as_mut() {
            let (_, infos) = l.end_restore();
            self.fixes = infos.into_iter().map(|f| (f.block_index(), f)).collect();
            self.rebuild |= !l.verify_integrity_after_restore_test() || l.needs_rebuild();
        }
    }

    /// Choose what to write for every bad block. Returns the writes and the
    /// number of bytes left unrestored.
    fn plan(&self, other: &Side<'_>, equal: &BTreeSet<u64>, override_equal: bool) -> (Vec<RestoreInfo>, u64) {
        let mut writes = Vec::new();
        let mut lost = 0u64;
        for &index in self.unreadable.union(&self.mismatched) {
            let position = index * BLOCK_SIZE as u64;
            if let Some(b) = self.cross.get(&index) {
                writes.push(RestoreInfo::recovered(position, b.clone()));
                continue;
            }
            let protected = equal.contains(&index) && !override_equal;
            let confirmed = |fixes: &BTreeMap<u64, RestoreInfo>| {
                fixes.get(&index).filter(|f| !f.not_recoverable).cloned()
            };
            if !protected {
                if let Some(f) = confirmed(&self.fixes).or_else(|| confirmed(&other.fixes)) {
                    writes.push(f);
                    continue;
                }
            }
            if let Some(b) = self.raw.get(&index) {
                writes.push(RestoreInfo::recovered(position, b.clone()));
                // Readable again, but still not what the ledger recorded.
                if self.ledger.is_some() {
                    lost += block_len(self.stat.len, index) as u64;
                }
                continue;
            }
            lost += block_len(self.stat.len, index) as u64;
            if self.unreadable.contains(&index) {
                writes.push(RestoreInfo::placeholder(position));
            }
        }
        (writes, lost)
    }

    fn settle(&self, cx: &SyncContext, writes: &[RestoreInfo], lost: u64) -> Result<Report> {
        let bad = self.bad_blocks();
        if bad == 0 {
            if self.writable && cx.settings.mark_tested && !self.rebuild {
                mark_tested(cx, self.path);
            }
            return Ok(Report::ok().rebuild(self.rebuild));
        }
        if !self.writable || writes.is_empty() {
            warn!(path = %self.path.display(), bad, "damaged blocks left in place");
            let rebuild = self.ledger.is_none();
            return Ok(Report::with_outcome(Outcome::Failed { bad_blocks: bad }).rebuild(rebuild));
        }
        let written = apply_fixes(cx, self.path, &self.stat, writes)?;
        info!(path = %self.path.display(), bad, written, lost, "cross-repaired");
        let (outcome, rebuild) = if lost == 0 {
            (Outcome::Repaired, self.rebuild)
        } else {
            (Outcome::PartiallyRecovered { lost_bytes: lost }, self.ledger.is_none())
        };
        Ok(Report::with_outcome(outcome).rebuild(rebuild))
    }
}

fn cross_recover(cx: &SyncContext, first: &Path, second: &Path, first_writable: bool) -> Result<CrossReport> {
    let first_stat = stat_existing(cx, first)?;
    let second_stat = stat_existing(cx, second)?;
    if first_stat.len != second_stat.len {
        return Err(SyncError::LengthMismatch {
            first: first.to_path_buf(),
            first_len: first_stat.len,
            second: second.to_path_buf(),
            second_len: second_stat.len,
        });
    }
    let skip_first = should_skip(cx, &first_stat, &cx.ledger_path(first));
    let skip_second = should_skip(cx, &second_stat, &cx.ledger_path(second));
    if skip_first && skip_second {
        info!(first = %first.display(), second = %second.display(), "recently confirmed, skipping test");
        return Ok(CrossReport { first: Report::skipped(), second: Report::skipped() });
    }
    cx.progress.set_stage("cross-repair");

    let mut a = Side::new(cx, first, first_stat, first_writable);
    let mut b = Side::new(cx, second, second_stat, true);
    if let (Some(la), Some(lb)) = (a.ledger.as_mut(), b.ledger.as_mut()) {
        let improved = la.improve_this_and_other(lb);
        if improved > 0 {
            info!(first = %first.display(), entries = improved, "ledgers repaired from each other");
            a.rebuild = true;
            b.rebuild = true;
        }
    }
    for l in a.ledger.iter_mut().chain(b.ledger.iter_mut()) {
        l.start_restore();
    }

    let order = cx.shared.next_read_order();
    let mut equal = BTreeSet::new();
    {
        let mut ra = BlockReader::open(cx, first, first_stat.len)?;
        let mut rb = BlockReader::open(cx, second, second_stat.len)?;
        let mut ba = cx.block();
        let mut bb = cx.block();
        for index in 0..ra.block_count() {
            cx.check_cancelled()?;
            let (ok_a, ok_b) = match order {
                ReadOrder::FirstThenSecond => {
                    let ok_a = ra.read(index, &mut ba);
                    (ok_a, rb.read(index, &mut bb))
                }
                ReadOrder::SecondThenFirst => {
                    let ok_b = rb.read(index, &mut bb);
                    (ra.read(index, &mut ba), ok_b)
                }
            };
            let own_a = ok_a.then_some(&*ba);
            let own_b = ok_b.then_some(&*bb);
            let same = ok_a && ok_b && *ba == *bb;
            if same {
                equal.insert(index);
            }
            a.observe(cx, index, own_a, own_b, same);
            b.observe(cx, index, own_b, own_a, same);
            cx.progress.add_block(2 * ra.block_len(index) as u64);
        }
    }
    a.finish();
    b.finish();

    let override_equal = cx.settings.override_equal_blocks;
    let (writes_a, lost_a) = a.plan(&b, &equal, override_equal);
    let (writes_b, lost_b) = b.plan(&a, &equal, override_equal);
    Ok(CrossReport {
        first: a.settle(cx, &writes_a, lost_a)?,
        second: b.settle(cx, &writes_b, lost_b)?,
    })
}

/// Cross-recover two equal-length copies, writing only to `second`.
pub fn test_and_repair_second_file(cx: &SyncContext, first: &Path, second: &Path) -> Result<CrossReport> {
    cross_recover(cx, first, second, false)
}

/// Cross-recover two equal-length copies, repairing both.
pub fn test_and_repair_two_files(cx: &SyncContext, first: &Path, second: &Path) -> Result<CrossReport> {
    cross_recover(cx, first, second, true)
}
