use std::io::{self, Read, Write};
use std::ops::{BitAnd, BitOr, BitXor, BitXorAssign, Deref, DerefMut, Index, IndexMut, Not};
use std::sync::{Arc, Mutex};

/// Size of every I/O unit processed by the engine.
pub const BLOCK_SIZE: usize = 4096;

/// Fixed 4096-byte buffer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlockBuffer {
    data: Box<[u8; BLOCK_SIZE]>,
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = &self.data[..8];
        write!(f, "BlockBuffer({:02x?}..)", head)
    }
}

impl BlockBuffer {
    /// Zero-filled block.
    pub fn new() -> Self {
        Self { data: Box::new([0u8; BLOCK_SIZE]) }
    }

    /// Copy `bytes` into a new block. The slice must be exactly one block long.
    pub fn from_slice(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != BLOCK_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block must be {} bytes, got {}", BLOCK_SIZE, bytes.len()),
            ));
        }
        let mut b = Self::new();
        b.data.copy_from_slice(bytes);
        Ok(b)
    }

    /// Copy up to one block from `bytes`, zero-padding the rest.
    pub fn from_prefix(bytes: &[u8]) -> Self {
        let mut b = Self::new();
        let n = bytes.len().min(BLOCK_SIZE);
        b.data[..n].copy_from_slice(&bytes[..n]);
        b
    }

    pub fn len(&self) -> usize {
        BLOCK_SIZE
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Fill the whole block from `r`.
    pub fn read_from<R: Read + ?Sized>(&mut self, r: &mut R) -> io::Result<usize> {
        self.read_first(r, BLOCK_SIZE)
    }

    /// Fill the first `n` bytes from `r` and zero the remainder. Returns the
    /// number of bytes actually read, which is less than `n` only at EOF.
    pub fn read_first<R: Read + ?Sized>(&mut self, r: &mut R, n: usize) -> io::Result<usize> {
        let n = n.min(BLOCK_SIZE);
        let got = read_full(r, &mut self.data[..n])?;
        self.data[got..].fill(0);
        Ok(got)
    }

    /// Fill the last `n` bytes from `r`; the leading part is left untouched.
    pub fn read_last<R: Read + ?Sized>(&mut self, r: &mut R, n: usize) -> io::Result<usize> {
        let n = n.min(BLOCK_SIZE);
        read_full(r, &mut self.data[BLOCK_SIZE - n..])
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.data[..])
    }

    /// Write only the first `n` bytes (truncated trailing block).
    pub fn write_first<W: Write + ?Sized>(&self, w: &mut W, n: usize) -> io::Result<()> {
        w.write_all(&self.data[..n.min(BLOCK_SIZE)])
    }

    pub fn write_last<W: Write + ?Sized>(&self, w: &mut W, n: usize) -> io::Result<()> {
        w.write_all(&self.data[BLOCK_SIZE - n.min(BLOCK_SIZE)..])
    }

    fn zip_with(&self, other: &Self, f: impl Fn(u8, u8) -> u8) -> Self {
        let mut out = Self::new();
        for (o, (a, b)) in out.data.iter_mut().zip(self.data.iter().zip(other.data.iter())) {
            *o = f(*a, *b);
        }
        out
    }
}

// Like read_exact, but a short read at EOF is not an error.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

impl Index<usize> for BlockBuffer {
    type Output = u8;
    fn index(&self, i: usize) -> &u8 {
        &self.data[i]
    }
}

impl IndexMut<usize> for BlockBuffer {
    fn index_mut(&mut self, i: usize) -> &mut u8 {
        &mut self.data[i]
    }
}

impl BitAnd for &BlockBuffer {
    type Output = BlockBuffer;
    fn bitand(self, rhs: Self) -> BlockBuffer {
        self.zip_with(rhs, |a, b| a & b)
    }
}

impl BitOr for &BlockBuffer {
    type Output = BlockBuffer;
    fn bitor(self, rhs: Self) -> BlockBuffer {
        self.zip_with(rhs, |a, b| a | b)
    }
}

impl BitXor for &BlockBuffer {
    type Output = BlockBuffer;
    fn bitxor(self, rhs: Self) -> BlockBuffer {
        self.zip_with(rhs, |a, b| a ^ b)
    }
}

impl BitXorAssign<&BlockBuffer> for BlockBuffer {
    fn bitxor_assign(&mut self, rhs: &BlockBuffer) {
        for (a, b) in self.data.iter_mut().zip(rhs.data.iter()) {
            *a ^= *b;
        }
    }
}

impl Not for &BlockBuffer {
    type Output = BlockBuffer;
    fn not(self) -> BlockBuffer {
        let mut out = BlockBuffer::new();
        for (o, a) in out.data.iter_mut().zip(self.data.iter()) {
            *o = !*a;
        }
        out
    }
}

/// Free-list of block allocations shared by the streaming loops.
#[derive(Debug)]
pub struct BlockPool {
    free: Mutex<Vec<BlockBuffer>>,
    max_free: usize,
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BlockPool {
    pub fn new(max_free: usize) -> Self {
        Self { free: Mutex::new(Vec::new()), max_free }
    }

    /// Hand out a zeroed block; it goes back to the pool when the guard drops.
    pub fn acquire(self: &Arc<Self>) -> PooledBlock {
        let reused = self.free.lock().ok().and_then(|mut v| v.pop());
        let block = match reused {
            Some(mut b) => {
                b.clear();
                b
            }
            None => BlockBuffer::new(),
        };
        PooledBlock { block: Some(block), pool: Arc::clone(self) }
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().map(|v| v.len()).unwrap_or(0)
    }

    fn release(&self, block: BlockBuffer) {
        if let Ok(mut v) = self.free.lock() {
            if v.len() < self.max_free {
                v.push(block);
            }
        }
    }
}

/// RAII handle to a pooled block.
pub struct PooledBlock {
    block: Option<BlockBuffer>,
    pool: Arc<BlockPool>,
}

impl PooledBlock {
    /// Detach the buffer from the pool.
    pub fn into_inner(mut self) -> BlockBuffer {
        self.block.take().unwrap_or_default()
    }
}

impl Deref for PooledBlock {
    type Target = BlockBuffer;
    fn deref(&self) -> &BlockBuffer {
        // Only `into_inner` and `drop` take the block, both by value.
        self.block.as_ref().expect("pooled block present until drop")
    }
}

impl DerefMut for PooledBlock {
    fn deref_mut(&mut self) -> &mut BlockBuffer {
        self.block.as_mut().expect("pooled block present until drop")
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        if let Some(b) = self.block.take() {
            self.pool.release(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bitwise_ops_are_elementwise() {
        let mut a = BlockBuffer::new();
        let mut b = BlockBuffer::new();
        a[0] = 0b1100;
        b[0] = 0b1010;
        assert_eq!((&a & &b)[0], 0b1000);
        assert_eq!((&a | &b)[0], 0b1110);
        assert_eq!((&a ^ &b)[0], 0b0110);
        assert_eq!((!&a)[0], !0b1100u8);
        assert_eq!((!&a)[1], 0xFF);
        a ^= &b;
        assert_eq!(a[0], 0b0110);
    }

    #[test]
    fn from_slice_enforces_length() {
        assert!(BlockBuffer::from_slice(&[0u8; 10]).is_err());
        assert!(BlockBuffer::from_slice(&[7u8; BLOCK_SIZE]).is_ok());
    }

    #[test]
    fn partial_reads_zero_the_tail() {
        let mut b = BlockBuffer::from_prefix(&[9u8; BLOCK_SIZE]);
        let mut src = Cursor::new(vec![1u8; 100]);
        let n = b.read_from(&mut src).unwrap();
        assert_eq!(n, 100);
        assert_eq!(b[99], 1);
        assert_eq!(b[100], 0);
        assert_eq!(b[BLOCK_SIZE - 1], 0);
    }

    #[test]
    fn first_and_last_writes() {
        let mut b = BlockBuffer::new();
        b[0] = 1;
        b[BLOCK_SIZE - 1] = 2;
        let mut out = Vec::new();
        b.write_first(&mut out, 3).unwrap();
        assert_eq!(out, vec![1, 0, 0]);
        out.clear();
        b.write_last(&mut out, 2).unwrap();
        assert_eq!(out, vec![0, 2]);

        let mut c = BlockBuffer::new();
        c.read_last(&mut Cursor::new(vec![5u8, 6]), 2).unwrap();
        assert_eq!(c[BLOCK_SIZE - 2], 5);
        assert_eq!(c[BLOCK_SIZE - 1], 6);
    }

    #[test]
    fn pool_recycles_and_clears() {
        let pool = Arc::new(BlockPool::new(4));
        {
            let mut g = pool.acquire();
            g[10] = 42;
        }
        assert_eq!(pool.free_count(), 1);
        let g = pool.acquire();
        assert_eq!(pool.free_count(), 0);
        assert!(g.is_zero());
    }
}
