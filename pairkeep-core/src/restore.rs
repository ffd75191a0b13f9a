use std::io::{self, Seek, SeekFrom, Write};

use crate::block::{BlockBuffer, BLOCK_SIZE};

/// A proposed block fix: write `data` at `position`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreInfo {
    /// Byte offset, always a multiple of the block size.
    pub position: u64,
    pub data: BlockBuffer,
    /// Placeholder only: the real content could not be reconstructed.
    pub not_recoverable: bool,
}

impl RestoreInfo {
    pub fn recovered(position: u64, data: BlockBuffer) -> Self {
        Self { position, data, not_recoverable: false }
    }

    pub fn placeholder(position: u64) -> Self {
        Self { position, data: BlockBuffer::new(), not_recoverable: true }
    }

    pub fn block_index(&self) -> u64 {
        self.position / BLOCK_SIZE as u64
    }

    /// Bytes this fix covers in a file of `file_len` bytes.
    pub fn write_len(&self, file_len: u64) -> usize {
        file_len.saturating_sub(self.position).min(BLOCK_SIZE as u64) as usize
    }

    /// Write the fix into `w` without growing it past `file_len`.
    pub fn apply<W: Write + Seek + ?Sized>(&self, w: &mut W, file_len: u64) -> io::Result<usize> {
        let n = self.write_len(file_len);
        if n == 0 {
            return Ok(0);
        }
        w.seek(SeekFrom::Start(self.position))?;
        self.data.write_first(w, n)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn final_block_write_is_truncated() {
        let len = (BLOCK_SIZE + 100) as u64;
        let mut file = Cursor::new(vec![0u8; len as usize]);
        let info = RestoreInfo::recovered(BLOCK_SIZE as u64, BlockBuffer::from_prefix(&[7u8; BLOCK_SIZE]));
        assert_eq!(info.apply(&mut file, len).unwrap(), 100);
        assert_eq!(file.get_ref().len(), len as usize);
        assert_eq!(file.get_ref()[BLOCK_SIZE + 99], 7);
    }

    proptest! {
        #[test]
        fn write_never_grows_the_file(blocks in 1u64..16, tail in 0u64..BLOCK_SIZE as u64, at in 0u64..16) {
            let len = (blocks - 1) * BLOCK_SIZE as u64 + tail.max(1);
            let pos = at.min(blocks - 1) * BLOCK_SIZE as u64;
            let mut file = Cursor::new(vec![0u8; len as usize]);
            let info = RestoreInfo::recovered(pos, BlockBuffer::from_prefix(&[1u8; BLOCK_SIZE]));
            let n = info.apply(&mut file, len).unwrap();
            prop_assert_eq!(n as u64, (len - pos).min(BLOCK_SIZE as u64));
            prop_assert_eq!(file.get_ref().len() as u64, len);
        }
    }
}
