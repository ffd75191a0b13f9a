use std::path::Path;

use tracing::{info, warn};

use crate::context::SyncContext;
use crate::create::create_saved_info;
use crate::direction::DirectionLogic;
use crate::error::{Result, SyncError};
use crate::fsio::FileStat;
use crate::report::{Action, PairReport, Side};

/// Extensions for which an empty file almost always means an earlier copy
/// failed half-way.
pub const ZERO_LENGTH_SUSPECT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "heic", "raw", "cr2", "nef", "mp3", "flac",
    "wav", "m4a", "mp4", "mov", "avi", "mkv", "wmv", "pdf", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "odt", "ods", "zip", "7z", "rar",
];

/// Whether `path` is named like the guard file (case-insensitive).
pub fn is_guard_file(path: &Path, guard_name: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_lowercase() == guard_name.to_lowercase())
}

fn is_zero_length_suspect(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| ZERO_LENGTH_SUSPECT_EXTENSIONS.contains(&e.as_str()))
}

fn stat_optional(cx: &SyncContext, path: &Path) -> Result<Option<FileStat>> {
    cx.fs.stat(path).map_err(|e| SyncError::io(path, e))
}

/// Process one pair: classify it, run the matching primitives and rebuild
/// the ledgers they flagged.
///
/// A pair that touches the guard file is logged and left alone.
pub fn process_pair(cx: &SyncContext, first: &Path, second: &Path) -> Result<PairReport> {
    let guard = &cx.settings.guard_file_name;
    if is_guard_file(first, guard) || is_guard_file(second, guard) {
        warn!(first = %first.display(), second = %second.display(), "guard file, pair skipped");
        return Ok(PairReport { guarded: true, ..PairReport::default() });
    }
    cx.check_cancelled()?;

    let first_stat = stat_optional(cx, first)?;
    let second_stat = stat_optional(cx, second)?;
    for (path, stat) in [(first, &first_stat), (second, &second_stat)] {
        if stat.is_some_and(|s| s.len == 0) && is_zero_length_suspect(path) {
            warn!(path = %path.display(), "zero-length file, probably a failed copy");
        }
    }

    let mut report = DirectionLogic::new(cx, first, second, first_stat, second_stat).run()?;
    rebuild_flagged(cx, first, second, &mut report)?;
    cx.progress.inc_pair();
    Ok(report)
}

fn rebuild_flagged(cx: &SyncContext, first: &Path, second: &Path, report: &mut PairReport) -> Result<()> {
    if !cx.settings.create_ledgers {
        return Ok(());
    }
    let sides = [
        (Side::First, first, cx.settings.first_writable()),
        (Side::Second, second, true),
    ];
    for (side, path, writable) in sides {
        if !report.rebuild(side) || !writable || !cx.fs.exists(path) {
            continue;
        }
        match create_saved_info(cx, path) {
            Ok(_) => {
                info!(path = %path.display(), "ledger rebuilt");
                report.push(Action::LedgerCreated { side });
            }
            Err(e @ (SyncError::Unreadable { .. } | SyncError::ChangedDuringScan(_))) => {
                warn!(path = %path.display(), error = %e, "ledger not rebuilt");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_match_ignores_case() {
        let guard = "PairKeep-Don't-Delete.txt";
        assert!(is_guard_file(Path::new("/a/pairkeep-don't-delete.TXT"), guard));
        assert!(!is_guard_file(Path::new("/a/PairKeep-Don't-Delete.txt.bak"), guard));
    }

    #[test]
    fn zero_length_list_is_by_extension() {
        assert!(is_zero_length_suspect(Path::new("x/IMG_0001.JPG")));
        assert!(!is_zero_length_suspect(Path::new("x/.gitkeep")));
        assert!(!is_zero_length_suspect(Path::new("x/notes.txt")));
    }
}
