//! Decides which primitives run for a pair. Nothing here touches file
//! contents directly.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::Direction;
use crate::context::{ReadOrder, SyncContext};
use crate::create::create_saved_info_and_copy;
use crate::error::{Result, SyncError};
use crate::filetime::{file_times_equal, is_last_chance};
use crate::fsio::FileStat;
use crate::repair::{
    copy_repair_single_file, test_and_repair_second_file, test_and_repair_single_file,
    test_and_repair_two_files,
};
use crate::report::{Action, CrossReport, Outcome, PairReport, Report, Side};
use crate::sidecar;
use crate::verify::test_single_file;

/// How the two files of a pair relate, computed once per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Situation {
    Neither,
    OnlyFirst,
    OnlySecond,
    FirstWins,
    SecondWins,
    Equal,
}

impl Situation {
    /// With `newer_wins` the newer file wins, and for equal times the bigger
    /// one; without it the first wins whenever the two differ.
    pub fn classify(first: Option<&FileStat>, second: Option<&FileStat>, newer_wins: bool) -> Self {
        let (a, b) = match (first, second) {
            (None, None) => return Situation::Neither,
            (Some(_), None) => return Situation::OnlyFirst,
            (None, Some(_)) => return Situation::OnlySecond,
            (Some(a), Some(b)) => (a, b),
        };
        let same_time = file_times_equal(&a.modified, &b.modified);
        if same_time && a.len == b.len {
            return Situation::Equal;
        }
        let first_wins = if !newer_wins {
            true
        } else if same_time {
            a.len > b.len
        } else {
            a.modified > b.modified
        };
        if first_wins {
            Situation::FirstWins
        } else {
            Situation::SecondWins
        }
    }
}

pub struct DirectionLogic<'a> {
    cx: &'a SyncContext,
    first: &'a Path,
    second: &'a Path,
    first_stat: Option<FileStat>,
    second_stat: Option<FileStat>,
    report: PairReport,
}

impl<'a> DirectionLogic<'a> {
    pub fn new(
        cx: &'a SyncContext,
        first: &'a Path,
        second: &'a Path,
        first_stat: Option<FileStat>,
        second_stat: Option<FileStat>,
    ) -> Self {
        Self { cx, first, second, first_stat, second_stat, report: PairReport::default() }
    }

    pub fn situation(&self) -> Situation {
        let newer_wins = match self.cx.settings.direction {
            Direction::FirstToSecond => self.cx.settings.sync_mode,
            Direction::Bidirectional => true,
        };
        Situation::classify(self.first_stat.as_ref(), self.second_stat.as_ref(), newer_wins)
    }

    pub fn run(mut self) -> Result<PairReport> {
        let situation = self.situation();
        debug!(first = %self.first.display(), second = %self.second.display(), ?situation, "pair classified");
        match self.cx.settings.direction {
            Direction::FirstToSecond => self.first_to_second(situation)?,
            Direction::Bidirectional => self.bidirectional(situation)?,
        }
        Ok(self.report)
    }

    fn first_to_second(&mut self, situation: Situation) -> Result<()> {
        match situation {
            Situation::Neither => {}
            Situation::OnlySecond if self.cx.settings.delete_orphans => {
                self.delete_orphan(Side::Second)?;
            }
            Situation::OnlySecond => {
                self.check(Side::Second)?;
            }
            Situation::OnlyFirst => {
                self.copy_over(Side::First)?;
            }
            Situation::FirstWins => self.replace_older(Side::First)?,
            Situation::SecondWins => {
                info!(second = %self.second.display(), "second copy is newer, leaving it in place");
                self.check(Side::First)?;
                self.check(Side::Second)?;
            }
            Situation::Equal => self.settle_equal()?,
        }
        Ok(())
    }

    fn bidirectional(&mut self, situation: Situation) -> Result<()> {
        match situation {
            Situation::Neither => {}
            Situation::OnlyFirst => {
                self.copy_over(Side::First)?;
            }
            Situation::OnlySecond if self.writable(Side::First) => {
                self.copy_over(Side::Second)?;
            }
            Situation::OnlySecond => {
                self.check(Side::Second)?;
            }
            Situation::FirstWins => self.sync_winner(Side::First)?,
            Situation::SecondWins => self.sync_winner(Side::Second)?,
            Situation::Equal => self.settle_equal()?,
        }
        Ok(())
    }

    fn path(&self, side: Side) -> &'a Path {
        match side {
            Side::First => self.first,
            Side::Second => self.second,
        }
    }

    fn stat(&self, side: Side) -> Result<FileStat> {
        let stat = match side {
            Side::First => self.first_stat,
            Side::Second => self.second_stat,
        };
        stat.ok_or_else(|| SyncError::NotFound(self.path(side).to_path_buf()))
    }

    fn writable(&self, side: Side) -> bool {
        match side {
            Side::First => self.cx.settings.first_writable(),
            Side::Second => true,
        }
    }

    fn record(&mut self, side: Side, report: &Report) {
        let action = if report.skipped {
            Action::SkippedTest { side }
        } else if matches!(report.outcome, Outcome::Repaired | Outcome::PartiallyRecovered { .. }) {
            Action::Repaired { side, outcome: report.outcome }
        } else {
            Action::Tested { side, outcome: report.outcome }
        };
        self.report.push(action);
        self.report.flag_rebuild(side, report.rebuild_ledger);
    }

    fn record_cross(&mut self, cross: CrossReport) {
        self.record(Side::First, &cross.first);
        self.record(Side::Second, &cross.second);
    }

    /// Test one file, repairing it when allowed. `None` when testing is off.
    fn check(&mut self, side: Side) -> Result<Option<Report>> {
        let settings = &self.cx.settings;
        let path = self.path(side);
        let report = if settings.repair_files && self.writable(side) {
            test_and_repair_single_file(self.cx, path)?
        } else if settings.test_files {
            test_single_file(self.cx, path, self.writable(side))?
        } else {
            return Ok(None);
        };
        self.record(side, &report);
        Ok(Some(report))
    }

    fn test_only(&mut self, side: Side) -> Result<Option<Report>> {
        if !self.cx.settings.test_files {
            return Ok(None);
        }
        let report = test_single_file(self.cx, self.path(side), self.writable(side))?;
        self.record(side, &report);
        Ok(Some(report))
    }

    fn delete_orphan(&mut self, side: Side) -> Result<()> {
        let path = self.path(side);
        self.cx.fs.remove(path).map_err(|e| SyncError::io(path, e))?;
        sidecar::remove_ledger(self.cx, &self.cx.ledger_path(path))?;
        info!(path = %path.display(), "deleted orphan");
        self.report.push(Action::DeletedOrphan);
        Ok(())
    }

    /// Copy `from` over the other side and give the copy a ledger: a clone
    /// of a valid source ledger, or one built during the copy.
    fn copy_over(&mut self, from: Side) -> Result<Report> {
        let cx = self.cx;
        let to = from.other();
        let (src, dst) = (self.path(from), self.path(to));
        let src_stat = self.stat(from)?;
        let src_ledger = cx.ledger_path(src);
        let dst_ledger = cx.ledger_path(dst);

        if sidecar::ledger_status(cx, &src_ledger, &src_stat).is_valid() {
            let repair_source = cx.settings.repair_files && self.writable(from);
            let report = copy_repair_single_file(cx, src, dst, repair_source)?;
            self.report.push(Action::Copied { from, outcome: report.outcome });
            if report.outcome.is_healthy() {
                sidecar::clone_ledger(cx, &src_ledger, &dst_ledger, src_stat.modified)?;
                self.report.push(Action::LedgerCloned { from });
                self.report.flag_rebuild(from, report.rebuild_ledger);
                self.report.flag_rebuild(to, report.rebuild_ledger);
            }
            return Ok(report);
        }

        if cx.settings.create_ledgers {
            let save_source = self.writable(from);
            let report = create_saved_info_and_copy(cx, src, dst, save_source)?;
            self.report.push(Action::Copied { from, outcome: report.outcome });
            if report.rebuild_ledger {
                self.report.flag_rebuild(from, true);
            } else {
                if save_source {
                    self.report.push(Action::LedgerCreated { side: from });
                    self.report.clear_rebuild(from);
                }
                self.report.push(Action::LedgerCreated { side: to });
                self.report.clear_rebuild(to);
            }
            return Ok(report);
        }

        let report = copy_repair_single_file(cx, src, dst, false)?;
        self.report.push(Action::Copied { from, outcome: report.outcome });
        Ok(report)
    }

    /// First→second with the first winning: never replace the second with a
    /// damaged first.
    fn replace_older(&mut self, winner: Side) -> Result<()> {
        if let Some(report) = self.check(winner)? {
            if !report.outcome.is_healthy() {
                warn!(
                    path = %self.path(winner).display(),
                    outcome = %report.outcome,
                    "newer copy is damaged, keeping the older one"
                );
                self.report.push(Action::SkippedOverwrite { from: winner });
                return Ok(());
            }
        }
        self.copy_over(winner)?;
        Ok(())
    }

    /// Bidirectional with a clear winner.
    fn sync_winner(&mut self, winner: Side) -> Result<()> {
        let loser = winner.other();
        if !self.writable(loser) {
            debug!(path = %self.path(loser).display(), "target read-only, testing only");
            self.test_only(winner)?;
            self.test_only(loser)?;
            return Ok(());
        }
        let healthy = self.test_only(winner)?.map_or(true, |r| r.outcome.is_healthy());
        if healthy {
            self.copy_over(winner)?;
            return Ok(());
        }
        if !(self.cx.settings.repair_files && self.writable(winner)) {
            warn!(path = %self.path(winner).display(), "newer copy is damaged and may not be repaired");
            self.report.push(Action::SkippedOverwrite { from: winner });
            return Ok(());
        }
        let repaired = test_and_repair_single_file(self.cx, self.path(winner))?;
        self.record(winner, &repaired);
        if repaired.outcome.is_healthy() {
            self.copy_over(winner)?;
            return Ok(());
        }
        self.recover_from_loser(winner)
    }

    /// Last resort for a damaged winner: cross-recover it from the other copy,
    /// which is never written.
    fn recover_from_loser(&mut self, winner: Side) -> Result<()> {
        let loser = winner.other();
        let (w, l) = (self.stat(winner)?, self.stat(loser)?);
        if is_last_chance(&l.modified) {
            warn!(
                path = %self.path(loser).display(),
                "other copy is itself a damaged last-chance copy, not using it as a source"
            );
            self.report.push(Action::RefusedLastChanceSource { side: loser });
            return Ok(());
        }
        if w.len != l.len {
            warn!(path = %self.path(winner).display(), "newer copy damaged and lengths differ, keeping both");
            self.report.push(Action::SkippedOverwrite { from: winner });
            return Ok(());
        }
        let cross = test_and_repair_second_file(self.cx, self.path(loser), self.path(winner))?;
        self.record(loser, &cross.first);
        self.record(winner, &cross.second);
        if cross.second.outcome.is_healthy() {
            self.copy_over(winner)?;
        } else {
            self.report.push(Action::SkippedOverwrite { from: winner });
        }
        Ok(())
    }

    /// Both copies look the same: share a valid ledger, then test both.
    fn settle_equal(&mut self) -> Result<()> {
        let cx = self.cx;
        let (fs1, fs2) = (self.stat(Side::First)?, self.stat(Side::Second)?);
        let (l1, l2) = (cx.ledger_path(self.first), cx.ledger_path(self.second));
        let v1 = sidecar::ledger_status(cx, &l1, &fs1).is_valid();
        let v2 = sidecar::ledger_status(cx, &l2, &fs2).is_valid();
        if v1 && !v2 && self.writable(Side::Second) {
            sidecar::clone_ledger(cx, &l1, &l2, fs2.modified)?;
            self.report.push(Action::LedgerCloned { from: Side::First });
        } else if v2 && !v1 && self.writable(Side::First) {
            sidecar::clone_ledger(cx, &l2, &l1, fs1.modified)?;
            self.report.push(Action::LedgerCloned { from: Side::Second });
        }

        if cx.settings.repair_files {
            let cross = if self.writable(Side::First) {
                test_and_repair_two_files(cx, self.first, self.second)?
            } else {
                test_and_repair_second_file(cx, self.first, self.second)?
            };
            self.record_cross(cross);
        } else if cx.settings.test_files {
            let order = match cx.shared.next_read_order() {
                ReadOrder::FirstThenSecond => [Side::First, Side::Second],
                ReadOrder::SecondThenFirst => [Side::Second, Side::First],
            };
            for side in order {
                self.test_only(side)?;
            }
        }
        Ok(())
    }
}
