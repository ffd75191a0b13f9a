//! In-memory [`FileSystem`] with injectable unreadable blocks.
//!
//! Used by the test suites to simulate media errors that a real disk cannot
//! be told to produce. A block marked unreadable fails every read that touches
//! it until the block is rewritten, just like a remapped sector.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::block::BLOCK_SIZE;
use crate::fsio::{FileStat, FileSystem, ReadStream, ReadStrategy, WriteStream};

#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    modified: DateTime<Utc>,
    bad_blocks: BTreeSet<u64>,
    hidden_system: bool,
}

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<PathBuf, MemFile>,
    fail_writes: BTreeSet<PathBuf>,
    fail_opens: BTreeMap<PathBuf, u32>,
}

#[derive(Debug, Default, Clone)]
pub struct MemFs {
    inner: Arc<Mutex<Inner>>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path.display()))
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the state from the others.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, path: impl AsRef<Path>, data: Vec<u8>, modified: DateTime<Utc>) {
        let file = MemFile { data, modified, bad_blocks: BTreeSet::new(), hidden_system: false };
        self.lock().files.insert(path.as_ref().to_path_buf(), file);
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).map(|f| f.data.clone())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    /// Make every read overlapping block `index` fail.
    pub fn mark_unreadable(&self, path: impl AsRef<Path>, index: u64) {
        if let Some(f) = self.lock().files.get_mut(path.as_ref()) {
            f.bad_blocks.insert(index);
        }
    }

    pub fn unreadable_blocks(&self, path: impl AsRef<Path>) -> Vec<u64> {
        self.lock()
            .files
            .get(path.as_ref())
            .map(|f| f.bad_blocks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Overwrite bytes without touching the modification time (silent corruption).
    pub fn corrupt(&self, path: impl AsRef<Path>, offset: usize, bytes: &[u8]) {
        if let Some(f) = self.lock().files.get_mut(path.as_ref()) {
            let end = (offset + bytes.len()).min(f.data.len());
            if offset < end {
                f.data[offset..end].copy_from_slice(&bytes[..end - offset]);
            }
        }
    }

    pub fn is_hidden_system(&self, path: impl AsRef<Path>) -> bool {
        self.lock().files.get(path.as_ref()).map(|f| f.hidden_system).unwrap_or(false)
    }

    /// Make writes to `path` fail, including creation.
    pub fn fail_writes_to(&self, path: impl AsRef<Path>) {
        self.lock().fail_writes.insert(path.as_ref().to_path_buf());
    }

    /// Make the next `count` opens for reading of `path` fail.
    pub fn fail_next_opens(&self, path: impl AsRef<Path>, count: u32) {
        self.lock().fail_opens.insert(path.as_ref().to_path_buf(), count);
    }
}

struct MemReader {
    data: Arc<Vec<u8>>,
    bad_blocks: BTreeSet<u64>,
    pos: u64,
}

impl Read for MemReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if self.pos >= len || buf.is_empty() {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(len - self.pos);
        let first = self.pos / BLOCK_SIZE as u64;
        let last = (self.pos + n - 1) / BLOCK_SIZE as u64;
        if self.bad_blocks.range(first..=last).next().is_some() {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated media error"));
        }
        let start = self.pos as usize;
        buf[..n as usize].copy_from_slice(&self.data[start..start + n as usize]);
        self.pos += n;
        Ok(n as usize)
    }
}

impl Seek for MemReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(self.pos, self.data.len() as u64, pos)?;
        Ok(self.pos)
    }
}

fn resolve_seek(cur: u64, len: u64, pos: SeekFrom) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(p) => p as i128,
        SeekFrom::End(d) => len as i128 + d as i128,
        SeekFrom::Current(d) => cur as i128 + d as i128,
    };
    if target < 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
    }
    Ok(target as u64)
}

struct MemWriter {
    fs: MemFs,
    path: PathBuf,
    pos: u64,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.fs.lock();
        if inner.fail_writes.contains(&self.path) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated write error"));
        }
        let f = inner.files.get_mut(&self.path).ok_or_else(|| not_found(&self.path))?;
        let start = self.pos as usize;
        let end = start + buf.len();
        if f.data.len() < end {
            f.data.resize(end, 0);
        }
        f.data[start..end].copy_from_slice(buf);
        if !buf.is_empty() {
            // Rewritten blocks are readable again.
            let first = self.pos / BLOCK_SIZE as u64;
            let last = (end as u64 - 1) / BLOCK_SIZE as u64;
            let healed: Vec<u64> = f.bad_blocks.range(first..=last).copied().collect();
            for b in healed {
                f.bad_blocks.remove(&b);
            }
        }
        f.modified = Utc::now();
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.fs.lock().files.get(&self.path).map(|f| f.data.len() as u64).unwrap_or(0);
        self.pos = resolve_seek(self.pos, len, pos)?;
        Ok(self.pos)
    }
}

impl WriteStream for MemWriter {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileSystem for MemFs {
    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>> {
        Ok(self
            .lock()
            .files
            .get(path)
            .map(|f| FileStat { len: f.data.len() as u64, modified: f.modified }))
    }

    fn open_read(&self, path: &Path, _strategy: ReadStrategy) -> io::Result<Box<dyn ReadStream>> {
        let mut inner = self.lock();
        if let Some(left) = inner.fail_opens.get_mut(path).filter(|n| **n > 0) {
            *left -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "simulated open error"));
        }
        let f = inner.files.get(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(MemReader {
            data: Arc::new(f.data.clone()),
            bad_blocks: f.bad_blocks.clone(),
            pos: 0,
        }))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn WriteStream>> {
        let mut inner = self.lock();
        if inner.fail_writes.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "simulated write error"));
        }
        inner.files.insert(
            path.to_path_buf(),
            MemFile {
                data: Vec::new(),
                modified: Utc::now(),
                bad_blocks: BTreeSet::new(),
                hidden_system: false,
            },
        );
        Ok(Box::new(MemWriter { fs: self.clone(), path: path.to_path_buf(), pos: 0 }))
    }

    fn open_update(&self, path: &Path) -> io::Result<Box<dyn WriteStream>> {
        if !self.lock().files.contains_key(path) {
            return Err(not_found(path));
        }
        Ok(Box::new(MemWriter { fs: self.clone(), path: path.to_path_buf(), pos: 0 }))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.lock().files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        let f = inner.files.remove(from).ok_or_else(|| not_found(from))?;
        inner.files.insert(to.to_path_buf(), f);
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        let f = inner.files.get(from).ok_or_else(|| not_found(from))?;
        if !f.bad_blocks.is_empty() {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated media error"));
        }
        let mut copy = f.clone();
        copy.hidden_system = false;
        inner.files.insert(to.to_path_buf(), copy);
        Ok(())
    }

    fn set_modified(&self, path: &Path, t: DateTime<Utc>) -> io::Result<()> {
        let mut inner = self.lock();
        let f = inner.files.get_mut(path).ok_or_else(|| not_found(path))?;
        f.modified = t;
        Ok(())
    }

    fn set_hidden_system(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        let f = inner.files.get_mut(path).ok_or_else(|| not_found(path))?;
        f.hidden_system = true;
        Ok(())
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_block_fails_only_overlapping_reads() {
        let fs = MemFs::new();
        let p = Path::new("/m/a.bin");
        fs.insert(p, vec![3u8; 3 * BLOCK_SIZE], Utc::now());
        fs.mark_unreadable(p, 1);
        let mut r = fs.open_read(p, ReadStrategy::Buffered).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        r.read_exact(&mut buf).unwrap();
        assert!(r.read(&mut buf).is_err());
        r.seek(SeekFrom::Start(2 * BLOCK_SIZE as u64)).unwrap();
        r.read_exact(&mut buf).unwrap();
    }

    #[test]
    fn rewriting_a_block_heals_it() {
        let fs = MemFs::new();
        let p = Path::new("/m/a.bin");
        fs.insert(p, vec![3u8; 2 * BLOCK_SIZE], Utc::now());
        fs.mark_unreadable(p, 0);
        let mut w = fs.open_update(p).unwrap();
        w.write_all(&[0u8; BLOCK_SIZE]).unwrap();
        assert!(fs.unreadable_blocks(p).is_empty());
        assert_eq!(fs.contents(p).unwrap().len(), 2 * BLOCK_SIZE);
    }
}
