//! Block-granular reading that survives media errors.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::block::{BlockBuffer, BLOCK_SIZE};
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::fsio::{FileSystem, ReadStream, ReadStrategy};

pub(crate) fn block_count(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE as u64)
}

pub(crate) fn block_len(len: u64, index: u64) -> usize {
    len.saturating_sub(index * BLOCK_SIZE as u64).min(BLOCK_SIZE as u64) as usize
}

/// Reads a file one block at a time. A block that cannot be read comes back
/// zeroed and the next call seeks to the following block boundary.
///
/// After the first failure the file is read unbuffered, so a single bad
/// sector does not take the neighbours in the read-ahead window down with it.
pub(crate) struct BlockReader {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    len: u64,
    strategy: ReadStrategy,
    stream: Option<Box<dyn ReadStream>>,
    pos: Option<u64>,
    unreadable: u64,
}

impl BlockReader {
    pub fn open(cx: &SyncContext, path: &Path, len: u64) -> Result<Self> {
        let strategy = ReadStrategy::Buffered;
        let stream = cx.fs.open_read(path, strategy).map_err(|e| SyncError::io(path, e))?;
        Ok(Self {
            fs: Arc::clone(&cx.fs),
            path: path.to_path_buf(),
            len,
            strategy,
            stream: Some(stream),
            pos: Some(0),
            unreadable: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn block_count(&self) -> u64 {
        block_count(self.len)
    }

    pub fn block_len(&self, index: u64) -> usize {
        block_len(self.len, index)
    }

    /// Blocks that failed so far.
    pub fn unreadable(&self) -> u64 {
        self.unreadable
    }

    /// Read block `index` into `buf`; `false` means unreadable.
    ///
    /// A failed block is never read again. The stream is dropped and the
    /// following blocks go through a fresh unbuffered one.
    pub fn read(&mut self, index: u64, buf: &mut BlockBuffer) -> bool {
        match self.try_read(index, buf) {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    path = %self.path.display(),
                    block = index,
                    strategy = ?self.strategy,
                    error = %e,
                    "block read failed"
                );
                self.stream = None;
                self.pos = None;
                self.strategy = ReadStrategy::Unbuffered;
                buf.clear();
                self.unreadable += 1;
                warn!(path = %self.path.display(), block = index, "unreadable block");
                false
            }
        }
    }

    fn try_read(&mut self, index: u64, buf: &mut BlockBuffer) -> io::Result<()> {
        let n = self.block_len(index);
        let at = index * BLOCK_SIZE as u64;
        // A failed open leaves the slot empty and is tried again on the next block.
        let stream = match self.stream.take() {
            Some(s) => s,
            None => {
                self.pos = None;
                self.fs.open_read(&self.path, self.strategy)?
            }
        };
        let stream = self.stream.insert(stream);
        if self.pos != Some(at) {
            stream.seek(SeekFrom::Start(at))?;
        }
        let got = buf.read_first(stream, n)?;
        if got < n {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while reading"));
        }
        self.pos = Some(at + n as u64);
        Ok(())
    }
}
