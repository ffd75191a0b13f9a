//! Per-file checksum and redundancy ledger.
//!
//! Every 4096-byte block gets a 64-bit checksum (the first 8 bytes of its
//! BLAKE3 hash, computed over the zero-padded block). Blocks are grouped in
//! stripes; each stripe carries Reed–Solomon parity blocks so that a limited
//! number of failed blocks per stripe can be rebuilt. Parity blocks carry
//! their own CRC32 so damage to the ledger itself is told apart from damage to
//! the data file.
//!
//! Sidecar layout:
//!
//! ```text
//! "PKLEDGER" NUL | version u32 LE | payload_len u32 LE | payload_crc32 u32 LE | payload
//! ```
//!
//! Version 2 payloads are zstd-compressed bincode. Version 1 (legacy) payloads
//! are plain bincode without parity CRCs; they stay readable and writable but
//! ask for a rebuild.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{BlockBuffer, BLOCK_SIZE};
use crate::error::{Result, SyncError};
use crate::filetime::file_times_equal;
use crate::fsio::FileStat;
use crate::restore::RestoreInfo;
use crate::rs_codec::StripeCodec;

const LEDGER_MAGIC: &[u8] = b"PKLEDGER"; // 8 bytes
const HEADER_LEN: usize = 8 + 1 + 4 + 4 + 4; // magic + NUL + version + len + crc
const VERSION_LEGACY: u32 = 1;
const VERSION_CURRENT: u32 = 2;
const MAX_PAYLOAD_BYTES: u32 = 1 << 30;

/// Stripe layout of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerGeometry {
    pub stripe_blocks: u16,
    pub parity_blocks: u16,
}

impl Default for LedgerGeometry {
    fn default() -> Self {
        Self { stripe_blocks: 64, parity_blocks: 2 }
    }
}

#[derive(Serialize, Deserialize)]
struct LedgerRecord {
    length: u64,
    timestamp_secs: i64,
    timestamp_nanos: u32,
    block_size: u32,
    stripe_blocks: u16,
    parity_blocks: u16,
    checksums: Vec<u64>,
    parity: Vec<Vec<u8>>,
    parity_crcs: Vec<u32>,
}

/// Version 1 record: no parity CRCs.
#[derive(Serialize, Deserialize)]
struct LedgerRecordV1 {
    length: u64,
    timestamp_secs: i64,
    timestamp_nanos: u32,
    block_size: u32,
    stripe_blocks: u16,
    parity_blocks: u16,
    checksums: Vec<u64>,
    parity: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
struct CollectState {
    next_index: u64,
    pending: Vec<BlockBuffer>,
}

#[derive(Debug, Clone, Default)]
struct RestoreSession {
    stripe: Option<usize>,
    slots: Vec<Option<BlockBuffer>>,
    next_unfinalized: usize,
    infos: Vec<RestoreInfo>,
    not_restored: u64,
}

/// Checksum of one zero-padded block.
pub fn block_checksum(block: &BlockBuffer) -> u64 {
    let h = blake3::hash(block.as_slice());
    let mut head = [0u8; 8];
    head.copy_from_slice(&h.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

#[derive(Debug, Clone)]
pub struct Ledger {
    length: u64,
    timestamp: DateTime<Utc>,
    geometry: LedgerGeometry,
    checksums: Vec<u64>,
    parity: Vec<BlockBuffer>,
    parity_crcs: Vec<u32>,
    legacy: bool,
    damaged: bool,
    collect: CollectState,
    session: Option<RestoreSession>,
}

impl Ledger {
    /// Empty ledger for a file of `length` bytes modified at `timestamp`,
    /// to be filled by [`Ledger::analyze_for_info_collection`].
    pub fn new(length: u64, timestamp: DateTime<Utc>, geometry: LedgerGeometry) -> Self {
        let blocks = length.div_ceil(BLOCK_SIZE as u64) as usize;
        let stripes = blocks.div_ceil(geometry.stripe_blocks.max(1) as usize);
        let parity_len = stripes * geometry.parity_blocks as usize;
        Self {
            length,
            timestamp,
            geometry,
            checksums: vec![0; blocks],
            parity: vec![BlockBuffer::new(); parity_len],
            parity_crcs: vec![0; parity_len],
            legacy: false,
            damaged: false,
            collect: CollectState::default(),
            session: None,
        }
    }

    pub fn for_file(stat: &FileStat, geometry: LedgerGeometry) -> Self {
        Self::new(stat.len, stat.modified, geometry)
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn geometry(&self) -> LedgerGeometry {
        self.geometry
    }

    pub fn block_count(&self) -> u64 {
        self.checksums.len() as u64
    }

    /// Whether this ledger still describes a file with the given stat.
    pub fn is_valid_for(&self, stat: &FileStat) -> bool {
        self.length == stat.len && file_times_equal(&self.timestamp, &stat.modified)
    }

    /// Whether every block has been fed through info collection.
    pub fn is_complete(&self) -> bool {
        self.collect.next_index == self.block_count()
    }

    fn stripe_len(&self) -> usize {
        self.geometry.stripe_blocks.max(1) as usize
    }

    fn stripe_count(&self) -> usize {
        self.checksums.len().div_ceil(self.stripe_len())
    }

    fn stripe_range(&self, stripe: usize) -> std::ops::Range<usize> {
        let start = stripe * self.stripe_len();
        start..(start + self.stripe_len()).min(self.checksums.len())
    }

    fn block_write_len(&self, index: usize) -> u64 {
        self.length.saturating_sub(index as u64 * BLOCK_SIZE as u64).min(BLOCK_SIZE as u64)
    }

    /// Record one block while building. Blocks must arrive in index order.
    pub fn analyze_for_info_collection(&mut self, block: &BlockBuffer, index: u64) -> Result<()> {
        if index != self.collect.next_index || index >= self.block_count() {
            return Err(SyncError::LedgerFormat(format!(
                "block {index} out of order (expected {})",
                self.collect.next_index
            )));
        }
        let i = index as usize;
        self.checksums[i] = block_checksum(block);
        self.collect.pending.push(block.clone());
        self.collect.next_index += 1;

        let stripe = i / self.stripe_len();
        if i + 1 == self.stripe_range(stripe).end {
            let pending = std::mem::take(&mut self.collect.pending);
            let m = self.geometry.parity_blocks as usize;
            if m > 0 {
                let codec = StripeCodec::new(pending.len(), m)?;
                for (j, p) in codec.encode(&pending)?.into_iter().enumerate() {
                    let slot = stripe * m + j;
                    self.parity_crcs[slot] = crc32(p.as_slice());
                    self.parity[slot] = p;
                }
            }
        }
        Ok(())
    }

    pub fn start_restore(&mut self) {
        self.session = Some(RestoreSession::default());
    }

    /// Check one block against the ledger, remembering it for reconstruction.
    ///
    /// May be called again for the same index with bytes from another source;
    /// a matching observation replaces a failed one.
    pub fn analyze_for_test_or_restore(&mut self, block: &BlockBuffer, index: u64) -> bool {
        let i = index as usize;
        if i >= self.checksums.len() {
            return false;
        }
        let ok = block_checksum(block) == self.checksums[i];
        if self.session.is_none() {
            return ok;
        }
        let stripe = i / self.stripe_len();
        let current = self.session.as_ref().and_then(|s| s.stripe);
        match current {
            Some(cur) if stripe < cur => return ok,
            Some(cur) if stripe == cur => {}
            _ => {
                self.finalize_until(stripe);
                let range = self.stripe_range(stripe);
                if let Some(s) = self.session.as_mut() {
                    s.stripe = Some(stripe);
                    s.slots = vec![None; range.len()];
                }
            }
        }
        if ok {
            let local = i - stripe * self.stripe_len();
            if let Some(s) = self.session.as_mut() {
                s.slots[local] = Some(block.clone());
            }
        }
        ok
    }

    /// Finish the session: every block that needs rewriting plus the number
    /// of bytes that could not be reconstructed.
    pub fn end_restore(&mut self) -> (u64, Vec<RestoreInfo>) {
        if self.session.is_none() {
            return (0, Vec::new());
        }
        self.finalize_until(self.stripe_count());
        let s = self.session.take().unwrap_or_default();
        (s.not_restored, s.infos)
    }

    // Finalize every stripe below `stripe`, including ones never visited.
    fn finalize_until(&mut self, stripe: usize) {
        let limit = stripe.min(self.stripe_count());
        loop {
            let (next, taken) = match self.session.as_mut() {
                None => return,
                Some(s) if s.next_unfinalized >= limit => return,
                Some(s) => {
                    let next = s.next_unfinalized;
                    s.next_unfinalized += 1;
                    let taken = if s.stripe == Some(next) {
                        s.stripe = None;
                        Some(std::mem::take(&mut s.slots))
                    } else {
                        None
                    };
                    (next, taken)
                }
            };
            let slots = taken.unwrap_or_else(|| vec![None; self.stripe_range(next).len()]);
            self.finalize_stripe(next, slots);
        }
    }

    fn finalize_stripe(&mut self, stripe: usize, slots: Vec<Option<BlockBuffer>>) {
        let range = self.stripe_range(stripe);
        let missing: Vec<usize> =
            slots.iter().enumerate().filter(|(_, s)| s.is_none()).map(|(l, _)| l).collect();
        if missing.is_empty() {
            return;
        }
        let m = self.geometry.parity_blocks as usize;
        let mut parity_shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(m);
        for j in 0..m {
            let slot = stripe * m + j;
            if crc32(self.parity[slot].as_slice()) == self.parity_crcs[slot] {
                parity_shards.push(Some(self.parity[slot].as_slice().to_vec()));
            } else {
                self.damaged = true;
                parity_shards.push(None);
            }
        }
        let usable = parity_shards.iter().filter(|p| p.is_some()).count();

        let mut rebuilt: Vec<Option<Vec<u8>>> =
            slots.iter().map(|s| s.as_ref().map(|b| b.as_slice().to_vec())).collect();
        let reconstructed = missing.len() <= usable
            && StripeCodec::new(range.len(), m)
                .and_then(|codec| {
                    rebuilt.extend(parity_shards);
                    codec.reconstruct(&mut rebuilt)
                })
                .is_ok();

        let mut infos = Vec::with_capacity(missing.len());
        let mut lost = 0u64;
        for local in missing {
            let index = range.start + local;
            let position = index as u64 * BLOCK_SIZE as u64;
            let candidate = if reconstructed {
                rebuilt.get(local).and_then(|s| s.as_deref()).map(BlockBuffer::from_prefix)
            } else {
                None
            };
            match candidate {
                Some(b) if block_checksum(&b) == self.checksums[index] => {
                    infos.push(RestoreInfo::recovered(position, b));
                }
                other => {
                    if other.is_some() {
                        debug!(block = index, "reconstructed block does not match its checksum");
                        self.damaged = true;
                    }
                    lost += self.block_write_len(index);
                    infos.push(RestoreInfo::placeholder(position));
                }
            }
        }
        if let Some(s) = self.session.as_mut() {
            s.infos.extend(infos);
            s.not_restored += lost;
        }
    }

    /// False when the ledger's own metadata shows damage.
    pub fn verify_integrity_after_restore_test(&self) -> bool {
        if self.damaged {
            return false;
        }
        self.parity.len() == self.parity_crcs.len()
            && self.parity.iter().zip(&self.parity_crcs).all(|(p, c)| crc32(p.as_slice()) == *c)
    }

    fn same_layout(&self, other: &Ledger) -> bool {
        self.length == other.length
            && self.geometry == other.geometry
            && self.checksums.len() == other.checksums.len()
            && self.parity.len() == other.parity.len()
    }

    /// Repair damaged parts of either ledger from the other one. Returns the
    /// number of entries that were replaced.
    pub fn improve_this_and_other(&mut self, other: &mut Ledger) -> usize {
        if !self.same_layout(other) || !file_times_equal(&self.timestamp, &other.timestamp) {
            return 0;
        }
        let mut fixed = 0;
        for slot in 0..self.parity.len() {
            let mine = crc32(self.parity[slot].as_slice()) == self.parity_crcs[slot];
            let theirs = crc32(other.parity[slot].as_slice()) == other.parity_crcs[slot];
            if !mine && theirs {
                self.parity[slot] = other.parity[slot].clone();
                self.parity_crcs[slot] = other.parity_crcs[slot];
                fixed += 1;
            } else if mine && !theirs {
                other.parity[slot] = self.parity[slot].clone();
                other.parity_crcs[slot] = self.parity_crcs[slot];
                fixed += 1;
            }
        }
        if self.damaged != other.damaged {
            let (good, bad) = if self.damaged { (&*other, &mut *self) } else { (&*self, &mut *other) };
            for (b, g) in bad.checksums.iter_mut().zip(&good.checksums) {
                if b != g {
                    *b = *g;
                    fixed += 1;
                }
            }
        }
        fixed
    }

    pub fn needs_rebuild(&self) -> bool {
        self.legacy
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    fn timestamp_parts(&self) -> (i64, u32) {
        (self.timestamp.timestamp(), self.timestamp.timestamp_subsec_nanos())
    }

    pub fn save_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let (timestamp_secs, timestamp_nanos) = self.timestamp_parts();
        let record = LedgerRecord {
            length: self.length,
            timestamp_secs,
            timestamp_nanos,
            block_size: BLOCK_SIZE as u32,
            stripe_blocks: self.geometry.stripe_blocks,
            parity_blocks: self.geometry.parity_blocks,
            checksums: self.checksums.clone(),
            parity: self.parity.iter().map(|p| p.as_slice().to_vec()).collect(),
            parity_crcs: self.parity_crcs.clone(),
        };
        let raw = bincode::serialize(&record).map_err(|e| SyncError::LedgerFormat(e.to_string()))?;
        let payload = zstd::stream::encode_all(&raw[..], 3)
            .map_err(|e| SyncError::LedgerFormat(format!("zstd compress: {e}")))?;
        write_container(w, VERSION_CURRENT, &payload)
    }

    /// Write the version 1 layout understood by older readers.
    pub fn save_to_legacy<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let (timestamp_secs, timestamp_nanos) = self.timestamp_parts();
        let record = LedgerRecordV1 {
            length: self.length,
            timestamp_secs,
            timestamp_nanos,
            block_size: BLOCK_SIZE as u32,
            stripe_blocks: self.geometry.stripe_blocks,
            parity_blocks: self.geometry.parity_blocks,
            checksums: self.checksums.clone(),
            parity: self.parity.iter().map(|p| p.as_slice().to_vec()).collect(),
        };
        let payload =
            bincode::serialize(&record).map_err(|e| SyncError::LedgerFormat(e.to_string()))?;
        write_container(w, VERSION_LEGACY, &payload)
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Ledger> {
        let mut header = [0u8; HEADER_LEN];
        r.read_exact(&mut header).map_err(|e| SyncError::LedgerFormat(format!("header: {e}")))?;
        if &header[..8] != LEDGER_MAGIC || header[8] != 0 {
            return Err(SyncError::LedgerFormat("bad magic".into()));
        }
        let version = u32_at(&header, 9);
        let len = u32_at(&header, 13);
        let crc = u32_at(&header, 17);
        if len > MAX_PAYLOAD_BYTES {
            return Err(SyncError::LedgerFormat(format!("payload too large: {len} bytes")));
        }
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload).map_err(|e| SyncError::LedgerFormat(format!("payload: {e}")))?;
        if crc32(&payload) != crc {
            return Err(SyncError::LedgerFormat("payload CRC mismatch".into()));
        }
        let record = match version {
            VERSION_CURRENT => {
                let raw = zstd::stream::decode_all(&payload[..])
                    .map_err(|e| SyncError::LedgerFormat(format!("zstd decompress: {e}")))?;
                bincode::deserialize::<LedgerRecord>(&raw)
                    .map_err(|e| SyncError::LedgerFormat(e.to_string()))?
            }
            VERSION_LEGACY => {
                let v1: LedgerRecordV1 = bincode::deserialize(&payload)
                    .map_err(|e| SyncError::LedgerFormat(e.to_string()))?;
                let parity_crcs = v1.parity.iter().map(|p| crc32(p)).collect();
                LedgerRecord {
                    length: v1.length,
                    timestamp_secs: v1.timestamp_secs,
                    timestamp_nanos: v1.timestamp_nanos,
                    block_size: v1.block_size,
                    stripe_blocks: v1.stripe_blocks,
                    parity_blocks: v1.parity_blocks,
                    checksums: v1.checksums,
                    parity: v1.parity,
                    parity_crcs,
                }
            }
            other => return Err(SyncError::LedgerFormat(format!("unknown version {other}"))),
        };
        Self::from_record(record, version == VERSION_LEGACY)
    }

    fn from_record(rec: LedgerRecord, legacy: bool) -> Result<Ledger> {
        if rec.block_size as usize != BLOCK_SIZE {
            return Err(SyncError::LedgerFormat(format!("block size {}", rec.block_size)));
        }
        let timestamp = DateTime::<Utc>::from_timestamp(rec.timestamp_secs, rec.timestamp_nanos)
            .ok_or_else(|| SyncError::LedgerFormat("timestamp out of range".into()))?;
        let geometry =
            LedgerGeometry { stripe_blocks: rec.stripe_blocks, parity_blocks: rec.parity_blocks };
        let mut ledger = Ledger::new(rec.length, timestamp, geometry);
        if rec.checksums.len() != ledger.checksums.len()
            || rec.parity.len() != ledger.parity.len()
            || rec.parity_crcs.len() != ledger.parity.len()
        {
            return Err(SyncError::LedgerFormat("entry count does not match length".into()));
        }
        ledger.checksums = rec.checksums;
        ledger.parity = rec.parity.iter().map(|p| BlockBuffer::from_prefix(p)).collect();
        ledger.parity_crcs = rec.parity_crcs;
        ledger.legacy = legacy;
        ledger.collect.next_index = ledger.block_count();
        Ok(ledger)
    }

    /// Same persisted content as `other`.
    pub fn same_content(&self, other: &Ledger) -> bool {
        self.same_layout(other)
            && self.timestamp == other.timestamp
            && self.checksums == other.checksums
            && self.parity == other.parity
            && self.parity_crcs == other.parity_crcs
    }
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn write_container<W: Write + ?Sized>(w: &mut W, version: u32, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| SyncError::LedgerFormat("ledger too large".into()))?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(LEDGER_MAGIC);
    header.push(0);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&len.to_le_bytes());
    header.extend_from_slice(&crc32(payload).to_le_bytes());
    let io = |e: std::io::Error| SyncError::LedgerFormat(format!("write: {e}"));
    w.write_all(&header).map_err(io)?;
    w.write_all(payload).map_err(io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 5, 6, 7, 8, 9).unwrap()
    }

    fn blocks(n: usize) -> Vec<BlockBuffer> {
        (0..n)
            .map(|i| {
                let mut b = BlockBuffer::new();
                for (j, x) in b.as_mut_slice().iter_mut().enumerate() {
                    *x = (i * 31 + j * 7) as u8;
                }
                b
            })
            .collect()
    }

    fn build(data: &[BlockBuffer], geometry: LedgerGeometry) -> Ledger {
        let mut l = Ledger::new((data.len() * BLOCK_SIZE) as u64, when(), geometry);
        for (i, b) in data.iter().enumerate() {
            l.analyze_for_info_collection(b, i as u64).unwrap();
        }
        assert!(l.is_complete());
        l
    }

    #[test]
    fn clean_pass_yields_no_fixes() {
        let data = blocks(10);
        let mut l = build(&data, LedgerGeometry::default());
        l.start_restore();
        for (i, b) in data.iter().enumerate() {
            assert!(l.analyze_for_test_or_restore(b, i as u64));
        }
        let (lost, infos) = l.end_restore();
        assert_eq!(lost, 0);
        assert!(infos.is_empty());
        assert!(l.verify_integrity_after_restore_test());
    }

    #[test]
    fn rebuilds_missing_and_corrupt_blocks() {
        let data = blocks(10);
        let geometry = LedgerGeometry { stripe_blocks: 4, parity_blocks: 2 };
        let mut l = build(&data, geometry);
        l.start_restore();
        for (i, b) in data.iter().enumerate() {
            if i == 1 {
                continue; // unreadable
            }
            let mut seen = b.clone();
            if i == 9 {
                seen[0] ^= 0xFF;
            }
            assert_eq!(l.analyze_for_test_or_restore(&seen, i as u64), i != 9);
        }
        let (lost, infos) = l.end_restore();
        assert_eq!(lost, 0);
        assert_eq!(infos.len(), 2);
        for info in infos {
            assert!(!info.not_recoverable);
            assert_eq!(info.data, data[info.block_index() as usize]);
        }
    }

    #[test]
    fn too_much_damage_yields_placeholders() {
        let data = blocks(4);
        let geometry = LedgerGeometry { stripe_blocks: 4, parity_blocks: 1 };
        let mut l = build(&data, geometry);
        l.start_restore();
        l.analyze_for_test_or_restore(&data[0], 0);
        l.analyze_for_test_or_restore(&data[1], 1);
        let (lost, infos) = l.end_restore();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.not_recoverable));
        assert_eq!(lost, 2 * BLOCK_SIZE as u64);
    }

    #[test]
    fn reanalysis_with_other_bytes_replaces_failure() {
        let data = blocks(3);
        let mut l = build(&data, LedgerGeometry { stripe_blocks: 4, parity_blocks: 0 });
        l.start_restore();
        let mut bad = data[0].clone();
        bad[5] ^= 1;
        assert!(!l.analyze_for_test_or_restore(&bad, 0));
        assert!(l.analyze_for_test_or_restore(&data[0], 0));
        l.analyze_for_test_or_restore(&data[1], 1);
        l.analyze_for_test_or_restore(&data[2], 2);
        let (lost, infos) = l.end_restore();
        assert_eq!((lost, infos.len()), (0, 0));
    }

    #[test]
    fn both_formats_round_trip() {
        let data = blocks(5);
        let l = build(&data, LedgerGeometry::default());
        let mut cur = Vec::new();
        l.save_to(&mut cur).unwrap();
        let back = Ledger::read_from(&mut &cur[..]).unwrap();
        assert!(back.same_content(&l));
        assert!(!back.needs_rebuild());

        let mut old = Vec::new();
        l.save_to_legacy(&mut old).unwrap();
        let back = Ledger::read_from(&mut &old[..]).unwrap();
        assert!(back.same_content(&l));
        assert!(back.needs_rebuild());
    }

    #[test]
    fn damaged_container_is_rejected() {
        let l = build(&blocks(2), LedgerGeometry::default());
        let mut buf = Vec::new();
        l.save_to(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0x40;
        assert!(matches!(Ledger::read_from(&mut &buf[..]), Err(SyncError::LedgerFormat(_))));
    }

    #[test]
    fn improve_repairs_damaged_parity_from_other() {
        let data = blocks(6);
        let mut a = build(&data, LedgerGeometry::default());
        let mut b = a.clone();
        a.parity[1][0] ^= 0xFF;
        assert!(!a.verify_integrity_after_restore_test());
        assert_eq!(a.improve_this_and_other(&mut b), 1);
        assert!(a.verify_integrity_after_restore_test());
        assert!(a.same_content(&b));
    }

    #[test]
    fn partial_final_block_is_hashed_zero_padded() {
        let mut l = Ledger::new(100, when(), LedgerGeometry::default());
        let b = BlockBuffer::from_prefix(&[1u8; 100]);
        l.analyze_for_info_collection(&b, 0).unwrap();
        l.start_restore();
        assert!(l.analyze_for_test_or_restore(&b, 0));
        assert!(l.is_valid_for(&FileStat { len: 100, modified: when() }));
        assert!(!l.is_valid_for(&FileStat { len: 101, modified: when() }));
    }
}
