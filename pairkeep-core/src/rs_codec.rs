use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::block::{BlockBuffer, BLOCK_SIZE};
use crate::error::{Result, SyncError};

/// Reed–Solomon parity over one stripe of blocks.
pub struct StripeCodec {
    pub data_blocks: usize,
    pub parity_blocks: usize,
    inner: ReedSolomon,
}

fn codec_err(e: reed_solomon_erasure::Error) -> SyncError {
    SyncError::LedgerFormat(format!("reed-solomon: {e:?}"))
}

impl StripeCodec {
    pub fn new(data_blocks: usize, parity_blocks: usize) -> Result<Self> {
        let inner = ReedSolomon::new(data_blocks, parity_blocks).map_err(codec_err)?;
        Ok(Self { data_blocks, parity_blocks, inner })
    }

    /// Compute the parity blocks of a full stripe.
    pub fn encode(&self, data: &[BlockBuffer]) -> Result<Vec<BlockBuffer>> {
        let mut shards: Vec<Vec<u8>> = data.iter().map(|b| b.as_slice().to_vec()).collect();
        shards.extend((0..self.parity_blocks).map(|_| vec![0u8; BLOCK_SIZE]));
        self.inner.encode(&mut shards).map_err(codec_err)?;
        shards.drain(..self.data_blocks);
        shards
            .iter()
            .map(|s| BlockBuffer::from_slice(s).map_err(|e| SyncError::LedgerFormat(e.to_string())))
            .collect()
    }

    /// Fill in the missing data blocks of a stripe. `shards` holds the data
    /// blocks followed by the parity blocks; `None` marks a missing one.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.inner.reconstruct_data(shards).map_err(codec_err)
    }
}
