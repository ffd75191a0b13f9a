use std::fmt;

/// Result of one test or repair primitive on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every block checked out (or could not be checked, see
    /// [`Report::rebuild_ledger`]).
    Ok,
    /// Damage was found and fully repaired.
    Repaired,
    /// Some damage remains; `lost_bytes` could not be reconstructed.
    PartiallyRecovered { lost_bytes: u64 },
    /// Damage was found and nothing was written.
    Failed { bad_blocks: u64 },
}

impl Outcome {
    /// The file is now in the state its ledger describes.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Outcome::Ok | Outcome::Repaired)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::Repaired => write!(f, "repaired"),
            Outcome::PartiallyRecovered { lost_bytes } => {
                write!(f, "partially recovered ({lost_bytes} bytes lost)")
            }
            Outcome::Failed { bad_blocks } => write!(f, "failed ({bad_blocks} bad blocks)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub outcome: Outcome,
    /// The ledger was missing, stale, unreadable or damaged.
    pub rebuild_ledger: bool,
    /// The physical scan was skipped by the recently-tested heuristic.
    pub skipped: bool,
}

impl Report {
    pub fn ok() -> Self {
        Self { outcome: Outcome::Ok, rebuild_ledger: false, skipped: false }
    }

    pub fn skipped() -> Self {
        Self { skipped: true, ..Self::ok() }
    }

    pub fn with_outcome(outcome: Outcome) -> Self {
        Self { outcome, ..Self::ok() }
    }

    pub fn rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild_ledger |= rebuild;
        self
    }
}

/// Results of a lock-step operation on both files of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossReport {
    pub first: Report,
    pub second: Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    First,
    Second,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::First => "first",
            Side::Second => "second",
        })
    }
}

/// Something the engine did (or deliberately did not do) to a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Tested { side: Side, outcome: Outcome },
    SkippedTest { side: Side },
    Repaired { side: Side, outcome: Outcome },
    Copied { from: Side, outcome: Outcome },
    LedgerCreated { side: Side },
    LedgerCloned { from: Side },
    DeletedOrphan,
    /// The winning copy was damaged, so the other one was kept.
    SkippedOverwrite { from: Side },
    /// A quality-as-timestamp copy was not used as a repair source.
    RefusedLastChanceSource { side: Side },
}

/// Everything that happened to one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairReport {
    pub actions: Vec<Action>,
    pub rebuild_first: bool,
    pub rebuild_second: bool,
    /// The pair touched the guard file and was left alone.
    pub guarded: bool,
}

impl PairReport {
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn flag_rebuild(&mut self, side: Side, rebuild: bool) {
        match side {
            Side::First => self.rebuild_first |= rebuild,
            Side::Second => self.rebuild_second |= rebuild,
        }
    }

    /// Drop a rebuild request that a freshly written ledger already covers.
    pub fn clear_rebuild(&mut self, side: Side) {
        match side {
            Side::First => self.rebuild_first = false,
            Side::Second => self.rebuild_second = false,
        }
    }

    pub fn rebuild(&self, side: Side) -> bool {
        match side {
            Side::First => self.rebuild_first,
            Side::Second => self.rebuild_second,
        }
    }

    pub fn contains(&self, pred: impl Fn(&Action) -> bool) -> bool {
        self.actions.iter().any(pred)
    }

    /// No recorded step ended with residual damage.
    pub fn is_healthy(&self) -> bool {
        self.actions.iter().all(|a| match a {
            Action::Tested { outcome, .. }
            | Action::Repaired { outcome, .. }
            | Action::Copied { outcome, .. } => outcome.is_healthy(),
            Action::SkippedOverwrite { .. } | Action::RefusedLastChanceSource { .. } => false,
            _ => true,
        })
    }
}
