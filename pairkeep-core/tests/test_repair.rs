use chrono::{DateTime, Duration, TimeZone, Utc};
use pairkeep_core::block::BLOCK_SIZE;
use pairkeep_core::config::LedgerFormat;
use pairkeep_core::filetime::{last_chance_errors, last_chance_time};
use pairkeep_core::fsio::{DiskFs, FileSystem};
use pairkeep_core::ledger::LedgerGeometry;
use pairkeep_core::memfs::MemFs;
use pairkeep_core::sidecar::{self, read_ledger};
use pairkeep_core::{create, repair, verify};
use pairkeep_core::{CancelToken, Outcome, SharedState, SyncContext, SyncError, SyncSettings};
use std::path::Path;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 6, 1, 12, 0, 0).unwrap()
}

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    fastrand::seed(seed);
    (0..len).map(|_| fastrand::u8(..)).collect()
}

fn ctx(fs: &MemFs, settings: SyncSettings) -> SyncContext {
    SyncContext::new(Arc::new(fs.clone()), settings)
}

fn block(data: &[u8], index: usize) -> &[u8] {
    let start = index * BLOCK_SIZE;
    &data[start..(start + BLOCK_SIZE).min(data.len())]
}

#[test]
fn create_then_test_clean_file() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    let data = random_bytes(10 * BLOCK_SIZE + 123, 1);
    fs.insert(p, data, t0());
    let cx = ctx(&fs, SyncSettings::default());

    let ledger = create::create_saved_info(&cx, p).unwrap();
    assert_eq!(ledger.block_count(), 11);

    let lp = cx.ledger_path(p);
    assert_eq!(fs.stat(&lp).unwrap().unwrap().modified, t0());
    assert!(fs.is_hidden_system(&lp));

    let r = verify::test_single_file(&cx, p, true).unwrap();
    assert_eq!(r.outcome, Outcome::Ok);
    assert!(!r.rebuild_ledger);
    assert!(fs.exists(&sidecar::tested_marker_path(&lp)));
    assert!(!fs.paths().iter().any(|p| p.to_string_lossy().ends_with(".tmp")));
}

#[test]
fn create_refuses_unreadable_file() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    fs.insert(p, random_bytes(4 * BLOCK_SIZE, 2), t0());
    fs.mark_unreadable(p, 2);
    let cx = ctx(&fs, SyncSettings::default());

    let err = create::create_saved_info(&cx, p).unwrap_err();
    assert!(matches!(err, SyncError::Unreadable { blocks: 1, .. }), "{err}");
    assert!(!fs.exists(&cx.ledger_path(p)));
}

#[test]
fn test_without_ledger_checks_readability_and_asks_for_one() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    fs.insert(p, random_bytes(3 * BLOCK_SIZE, 3), t0());
    let cx = ctx(&fs, SyncSettings::default());

    let r = verify::test_single_file(&cx, p, true).unwrap();
    assert_eq!(r.outcome, Outcome::Ok);
    assert!(r.rebuild_ledger);

    fs.mark_unreadable(p, 1);
    let r = verify::test_single_file(&cx, p, true).unwrap();
    assert_eq!(r.outcome, Outcome::Failed { bad_blocks: 1 });
}

#[test]
fn in_place_repair_restores_content_and_mtime() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    let data = random_bytes(20 * BLOCK_SIZE, 4);
    fs.insert(p, data.clone(), t0());
    let cx = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&cx, p).unwrap();

    fs.corrupt(p, 4 * BLOCK_SIZE + 17, &[0xAA; 300]);
    fs.mark_unreadable(p, 11);

    let r = verify::test_single_file(&cx, p, true).unwrap();
    assert_eq!(r.outcome, Outcome::Failed { bad_blocks: 2 });
    assert!(!r.rebuild_ledger);

    let r = repair::test_and_repair_single_file(&cx, p).unwrap();
    assert_eq!(r.outcome, Outcome::Repaired);
    assert!(!r.rebuild_ledger);
    assert_eq!(fs.contents(p).unwrap(), data);
    assert!(fs.unreadable_blocks(p).is_empty());
    assert_eq!(fs.stat(p).unwrap().unwrap().modified, t0());

    let r = verify::test_single_file(&cx, p, true).unwrap();
    assert_eq!(r.outcome, Outcome::Ok);
}

#[test]
fn in_place_repair_beyond_parity_zero_fills_unreadable_blocks() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    let data = random_bytes(8 * BLOCK_SIZE, 5);
    fs.insert(p, data.clone(), t0());
    let cx = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&cx, p).unwrap();

    for i in [1, 3, 5] {
        fs.mark_unreadable(p, i);
    }
    let r = repair::test_and_repair_single_file(&cx, p).unwrap();
    assert_eq!(r.outcome, Outcome::PartiallyRecovered { lost_bytes: 3 * BLOCK_SIZE as u64 });
    // The ledger still describes the good content.
    assert!(!r.rebuild_ledger);

    let after = fs.contents(p).unwrap();
    assert_eq!(after.len(), data.len());
    assert!(block(&after, 3).iter().all(|&b| b == 0));
    assert_eq!(block(&after, 0), block(&data, 0));
    assert!(fs.unreadable_blocks(p).is_empty());
}

#[test]
fn copy_repair_without_ledger_marks_last_chance() {
    let fs = MemFs::new();
    let (src, dst) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(10 * BLOCK_SIZE, 6);
    fs.insert(src, data.clone(), t0());
    fs.mark_unreadable(src, 2);
    fs.mark_unreadable(src, 5);
    let cx = ctx(&fs, SyncSettings::default());

    let r = repair::copy_repair_single_file(&cx, src, dst, false).unwrap();
    assert_eq!(r.outcome, Outcome::PartiallyRecovered { lost_bytes: 2 * BLOCK_SIZE as u64 });
    assert!(r.rebuild_ledger);

    let copy = fs.contents(dst).unwrap();
    assert_eq!(copy.len(), data.len());
    assert!(block(&copy, 2).iter().all(|&b| b == 0));
    assert!(block(&copy, 5).iter().all(|&b| b == 0));
    assert_eq!(block(&copy, 9), block(&data, 9));

    let mtime = fs.stat(dst).unwrap().unwrap().modified;
    assert_eq!(mtime, last_chance_time(2));
    assert_eq!(last_chance_errors(&mtime), Some(2));
    assert!(!fs.exists(&sidecar::tmp_path(dst)));
}

#[test]
fn copy_repair_with_ledger_restores_and_fixes_source() {
    let fs = MemFs::new();
    let (src, dst) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(10 * BLOCK_SIZE + 999, 7);
    fs.insert(src, data.clone(), t0());
    let cx = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&cx, src).unwrap();
    fs.mark_unreadable(src, 3);
    fs.mark_unreadable(src, 10);

    let r = repair::copy_repair_single_file(&cx, src, dst, true).unwrap();
    assert_eq!(r.outcome, Outcome::Repaired);
    assert!(!r.rebuild_ledger);
    assert_eq!(fs.contents(dst).unwrap(), data);
    assert_eq!(fs.stat(dst).unwrap().unwrap().modified, t0());

    assert_eq!(fs.contents(src).unwrap(), data);
    assert!(fs.unreadable_blocks(src).is_empty());
    assert_eq!(fs.stat(src).unwrap().unwrap().modified, t0());
}

#[test]
fn failed_copy_leaves_no_staging_file() {
    let fs = MemFs::new();
    let (src, dst) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    fs.insert(src, random_bytes(2 * BLOCK_SIZE, 8), t0());
    fs.fail_writes_to(sidecar::tmp_path(dst));
    let cx = ctx(&fs, SyncSettings::default());

    let err = repair::copy_repair_single_file(&cx, src, dst, false).unwrap_err();
    assert!(matches!(err, SyncError::Io { .. }), "{err}");
    assert!(!fs.exists(dst));
    assert!(!fs.exists(&sidecar::tmp_path(dst)));
}

#[test]
fn cross_repair_recovers_more_than_parity_allows() {
    let fs = MemFs::new();
    let (a, b) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(12 * BLOCK_SIZE, 9);
    fs.insert(a, data.clone(), t0());
    fs.insert(b, data.clone(), t0());
    let cx = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&cx, a).unwrap();
    create::create_saved_info(&cx, b).unwrap();

    // Four bad blocks in one stripe are beyond the two parity blocks.
    for i in [1, 2, 3, 4] {
        fs.mark_unreadable(a, i);
    }
    fs.corrupt(b, 7 * BLOCK_SIZE, &[0x55; 64]);

    let r = repair::test_and_repair_two_files(&cx, a, b).unwrap();
    assert_eq!(r.first.outcome, Outcome::Repaired);
    assert_eq!(r.second.outcome, Outcome::Repaired);
    assert_eq!(fs.contents(a).unwrap(), data);
    assert_eq!(fs.contents(b).unwrap(), data);
    assert_eq!(fs.stat(a).unwrap().unwrap().modified, t0());
}

#[test]
fn second_file_repair_never_writes_first() {
    let fs = MemFs::new();
    let (a, b) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(6 * BLOCK_SIZE, 10);
    fs.insert(a, data.clone(), t0());
    fs.insert(b, data.clone(), t0());
    let cx = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&cx, a).unwrap();
    create::create_saved_info(&cx, b).unwrap();

    fs.corrupt(a, 0, &[1, 2, 3]);
    fs.mark_unreadable(b, 4);

    let r = repair::test_and_repair_second_file(&cx, a, b).unwrap();
    assert_eq!(r.first.outcome, Outcome::Failed { bad_blocks: 1 });
    assert_eq!(r.second.outcome, Outcome::Repaired);
    assert_eq!(fs.contents(b).unwrap(), data);
    assert_ne!(fs.contents(a).unwrap(), data);
}

#[test]
fn raw_copy_that_fails_the_ledger_is_not_a_repair() {
    let fs = MemFs::new();
    let (a, b) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(12 * BLOCK_SIZE, 14);
    fs.insert(a, data.clone(), t0());
    fs.insert(b, data.clone(), t0());
    let cx = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&cx, a).unwrap();
    create::create_saved_info(&cx, b).unwrap();

    // Same four blocks lost in both copies, beyond what either ledger can rebuild.
    for i in [1, 2, 3, 4] {
        fs.mark_unreadable(a, i);
    }
    fs.corrupt(b, BLOCK_SIZE, &vec![0x5A; 4 * BLOCK_SIZE]);

    let r = repair::test_and_repair_two_files(&cx, a, b).unwrap();
    assert_eq!(r.first.outcome, Outcome::PartiallyRecovered { lost_bytes: 4 * BLOCK_SIZE as u64 });
    assert!(!r.first.rebuild_ledger);
    assert!(!r.first.outcome.is_healthy());
    assert_eq!(r.second.outcome, Outcome::Failed { bad_blocks: 4 });

    // Readable again, holding the other copy's bytes, and still failing its ledger.
    assert!(fs.unreadable_blocks(a).is_empty());
    assert_eq!(block(&fs.contents(a).unwrap(), 2), block(&fs.contents(b).unwrap(), 2));
    let r = verify::test_single_file(&cx, a, false).unwrap();
    assert_eq!(r.outcome, Outcome::Failed { bad_blocks: 4 });
}

#[test]
fn identical_blocks_are_kept_unless_overridden() {
    let fs = MemFs::new();
    let (a, b) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(8 * BLOCK_SIZE, 15);
    let damage = |fs: &MemFs| {
        fs.insert(a, data.clone(), t0());
        fs.insert(b, data.clone(), t0());
        let cx = ctx(fs, SyncSettings::default());
        create::create_saved_info(&cx, a).unwrap();
        create::create_saved_info(&cx, b).unwrap();
        fs.corrupt(a, 2 * BLOCK_SIZE + 40, &[0x77; 200]);
        fs.corrupt(b, 2 * BLOCK_SIZE + 40, &[0x77; 200]);
    };

    damage(&fs);
    let cx = ctx(&fs, SyncSettings::default());
    let r = repair::test_and_repair_two_files(&cx, a, b).unwrap();
    assert_eq!(r.first.outcome, Outcome::Failed { bad_blocks: 1 });
    assert_eq!(r.second.outcome, Outcome::Failed { bad_blocks: 1 });
    assert_ne!(fs.contents(a).unwrap(), data);
    assert_eq!(fs.contents(a).unwrap(), fs.contents(b).unwrap());

    damage(&fs);
    let cx = ctx(&fs, SyncSettings { override_equal_blocks: true, ..SyncSettings::default() });
    let r = repair::test_and_repair_two_files(&cx, a, b).unwrap();
    assert_eq!(r.first.outcome, Outcome::Repaired);
    assert_eq!(r.second.outcome, Outcome::Repaired);
    assert_eq!(fs.contents(a).unwrap(), data);
    assert_eq!(fs.contents(b).unwrap(), data);
}

#[test]
fn unrecoverable_side_adopts_the_other_sides_reconstruction() {
    let fs = MemFs::new();
    let (a, b) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(6 * BLOCK_SIZE, 16);
    fs.insert(a, data.clone(), t0());
    fs.insert(b, data.clone(), t0());
    // Checksums only on the first side, so it can detect but never rebuild.
    let no_parity = SyncSettings {
        geometry: LedgerGeometry { stripe_blocks: 64, parity_blocks: 0 },
        ..SyncSettings::default()
    };
    create::create_saved_info(&ctx(&fs, no_parity), a).unwrap();
    let cx = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&cx, b).unwrap();

    fs.mark_unreadable(a, 0);
    fs.mark_unreadable(b, 0);

    let r = repair::test_and_repair_single_file(&cx, a).unwrap();
    assert_eq!(r.outcome, Outcome::PartiallyRecovered { lost_bytes: BLOCK_SIZE as u64 });
    fs.mark_unreadable(a, 0);

    let r = repair::test_and_repair_two_files(&cx, a, b).unwrap();
    assert_eq!(r.first.outcome, Outcome::Repaired);
    assert_eq!(r.second.outcome, Outcome::Repaired);
    assert_eq!(fs.contents(a).unwrap(), data);
    assert_eq!(fs.contents(b).unwrap(), data);
}

#[test]
fn fail_fast_stops_at_the_first_bad_block() {
    let fs = MemFs::new();
    let (p, bare) = (Path::new("/d/a.bin"), Path::new("/d/b.bin"));
    fs.insert(p, random_bytes(8 * BLOCK_SIZE, 17), t0());
    fs.insert(bare, random_bytes(8 * BLOCK_SIZE, 18), t0());
    create::create_saved_info(&ctx(&fs, SyncSettings::default()), p).unwrap();
    for i in [1, 5] {
        fs.mark_unreadable(p, i);
        fs.mark_unreadable(bare, i);
    }

    let full = ctx(&fs, SyncSettings { mark_tested: false, ..SyncSettings::default() });
    assert_eq!(verify::test_single_file(&full, p, false).unwrap().outcome, Outcome::Failed { bad_blocks: 2 });
    assert_eq!(verify::test_single_file(&full, bare, false).unwrap().outcome, Outcome::Failed { bad_blocks: 2 });

    let cx = ctx(&fs, SyncSettings { fail_fast: true, mark_tested: false, ..SyncSettings::default() });
    // With a ledger.
    assert_eq!(verify::test_single_file(&cx, p, false).unwrap().outcome, Outcome::Failed { bad_blocks: 1 });
    // Readability only.
    assert_eq!(verify::test_single_file(&cx, bare, false).unwrap().outcome, Outcome::Failed { bad_blocks: 1 });

    let r = repair::test_and_repair_single_file(&cx, p).unwrap();
    assert_eq!(r.outcome, Outcome::Failed { bad_blocks: 1 });
    assert_eq!(fs.unreadable_blocks(p), vec![1, 5]);
    assert_eq!(fs.stat(p).unwrap().unwrap().modified, t0());
}

/// Flip one bit of the last stored parity CRC, keeping the container valid.
fn damage_stored_parity_crc(fs: &MemFs, ledger: &Path) {
    const HEADER: usize = 21;
    let bytes = fs.contents(ledger).unwrap();
    let mut raw = zstd::stream::decode_all(&bytes[HEADER..]).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    let payload = zstd::stream::encode_all(&raw[..], 3).unwrap();
    let mut out = bytes[..HEADER].to_vec();
    out[13..17].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out[17..21].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    let modified = fs.stat(ledger).unwrap().unwrap().modified;
    fs.insert(ledger, out, modified);
}

#[test]
fn cross_repair_mends_damaged_ledger_parity_from_the_other_ledger() {
    let fs = MemFs::new();
    let (a, b) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    let data = random_bytes(6 * BLOCK_SIZE, 19);
    fs.insert(a, data.clone(), t0());
    fs.insert(b, data.clone(), t0());
    let cx = ctx(&fs, SyncSettings { mark_tested: false, ..SyncSettings::default() });
    create::create_saved_info(&cx, a).unwrap();
    create::create_saved_info(&cx, b).unwrap();
    damage_stored_parity_crc(&fs, &cx.ledger_path(a));

    assert!(verify::test_single_file(&cx, a, false).unwrap().rebuild_ledger);
    assert!(!verify::test_single_file(&cx, b, false).unwrap().rebuild_ledger);

    // The second ledger was fine on its own; it is flagged only because the
    // pair's ledgers were mended from each other.
    let r = repair::test_and_repair_two_files(&cx, a, b).unwrap();
    assert_eq!(r.first.outcome, Outcome::Ok);
    assert_eq!(r.second.outcome, Outcome::Ok);
    assert!(r.first.rebuild_ledger);
    assert!(r.second.rebuild_ledger);
}

#[test]
fn cross_repair_rejects_different_lengths() {
    let fs = MemFs::new();
    let (a, b) = (Path::new("/a/f.bin"), Path::new("/b/f.bin"));
    fs.insert(a, vec![1; 100], t0());
    fs.insert(b, vec![1; 101], t0());
    let cx = ctx(&fs, SyncSettings::default());
    let err = repair::test_and_repair_two_files(&cx, a, b).unwrap_err();
    assert!(matches!(err, SyncError::LengthMismatch { first_len: 100, second_len: 101, .. }));
}

#[test]
fn legacy_ledger_is_accepted_but_flagged_for_rebuild() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    fs.insert(p, random_bytes(5 * BLOCK_SIZE, 11), t0());
    let legacy = SyncSettings { ledger_format: LedgerFormat::Legacy, ..SyncSettings::default() };
    create::create_saved_info(&ctx(&fs, legacy), p).unwrap();

    let cx = ctx(&fs, SyncSettings::default());
    let lp = cx.ledger_path(p);
    assert!(read_ledger(&fs, &lp).unwrap().unwrap().is_legacy());

    let r = verify::test_single_file(&cx, p, true).unwrap();
    assert_eq!(r.outcome, Outcome::Ok);
    assert!(r.rebuild_ledger);
    assert!(!fs.exists(&sidecar::tested_marker_path(&lp)));

    create::create_saved_info(&cx, p).unwrap();
    assert!(!read_ledger(&fs, &lp).unwrap().unwrap().is_legacy());
}

#[test]
fn cancelled_operations_stop_without_output() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    fs.insert(p, random_bytes(3 * BLOCK_SIZE, 12), t0());
    let cancel = CancelToken::new();
    let cx = ctx(&fs, SyncSettings::default()).with_cancel(cancel.clone());
    cancel.cancel();

    assert!(matches!(create::create_saved_info(&cx, p), Err(SyncError::Cancelled)));
    assert!(!fs.exists(&cx.ledger_path(p)));

    let dst = Path::new("/e/a.bin");
    assert!(matches!(repair::copy_repair_single_file(&cx, p, dst, false), Err(SyncError::Cancelled)));
    assert!(!fs.exists(dst));
}

#[test]
fn old_confirmations_skip_about_half_of_the_tests_mid_ramp() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    fs.insert(p, random_bytes(BLOCK_SIZE, 13), t0());
    let setup = ctx(&fs, SyncSettings::default());
    create::create_saved_info(&setup, p).unwrap();

    // Halfway up the ramp: 2 years of grace plus 2.5 of the 5 ramp years.
    let tested = t0() + Duration::days(verify::SKIP_GRACE_DAYS + verify::SKIP_RAMP_DAYS / 2);
    let settings = SyncSettings { mark_tested: false, ..SyncSettings::default() };
    let cx = ctx(&fs, settings)
        .with_clock(tested)
        .with_shared(Arc::new(SharedState::with_seed(2024)));
    verify::create_or_update_file_checked(&cx, p).unwrap();

    let runs = 400;
    let skipped = (0..runs)
        .filter(|_| verify::test_single_file(&cx, p, true).unwrap().skipped)
        .count();
    let rate = skipped as f64 / runs as f64;
    assert!((0.4..=0.6).contains(&rate), "skip rate {rate}");
}

#[test]
fn recent_confirmations_never_skip() {
    let fs = MemFs::new();
    let p = Path::new("/d/a.bin");
    fs.insert(p, random_bytes(BLOCK_SIZE, 14), t0());
    let cx = ctx(&fs, SyncSettings::default())
        .with_clock(t0() + Duration::days(30))
        .with_shared(Arc::new(SharedState::with_seed(1)));
    create::create_saved_info(&cx, p).unwrap();
    verify::create_or_update_file_checked(&cx, p).unwrap();

    for _ in 0..50 {
        assert!(!verify::test_single_file(&cx, p, false).unwrap().skipped);
    }

    let forced = SyncSettings { skip_recently_tested: false, ..SyncSettings::default() };
    let cx = ctx(&fs, forced).with_clock(t0() + Duration::days(10 * 366));
    verify::create_or_update_file_checked(&cx, p).unwrap();
    assert!(!verify::test_single_file(&cx, p, false).unwrap().skipped);
}

#[test]
fn disk_round_trip_repairs_real_file() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("photo.raw");
    let data = random_bytes(9 * BLOCK_SIZE + 5, 15);
    std::fs::write(&p, &data).unwrap();
    let cx = SyncContext::new(Arc::new(DiskFs), SyncSettings::default());

    create::create_saved_info(&cx, &p).unwrap();
    assert!(td.path().join("RestoreInfo").join("photo.raw.chk").is_file());
    let before = DiskFs.stat(&p).unwrap().unwrap().modified;

    {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = std::fs::OpenOptions::new().write(true).open(&p).unwrap();
        f.seek(SeekFrom::Start(6 * BLOCK_SIZE as u64 + 10)).unwrap();
        f.write_all(&[0xEE; 512]).unwrap();
    }
    // Silent corruption keeps the timestamp.
    DiskFs.set_modified(&p, before).unwrap();

    let r = repair::test_and_repair_single_file(&cx, &p).unwrap();
    assert_eq!(r.outcome, Outcome::Repaired);
    assert_eq!(std::fs::read(&p).unwrap(), data);
    assert_eq!(DiskFs.stat(&p).unwrap().unwrap().modified, before);
}
