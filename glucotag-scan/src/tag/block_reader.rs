//! Sequential block reads for one acquisition pass

use super::TagHandle;
use crate::decoder::RawBlockSet;
use crate::error::{Error, Result};
use tracing::{debug, trace};

/// Blocks collected by one pass, plus the failure that ended it early
#[derive(Debug)]
pub struct BlockReadPass {
    pub blocks: RawBlockSet,
    pub failure: Option<Error>,
}

impl BlockReadPass {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Read blocks `0..count` in order
///
/// The first failing read ends the pass. No retries happen here; the
/// verifier decides whether to try again.
pub async fn read_blocks<T: TagHandle>(tag: &mut T, count: usize, verbose: bool) -> BlockReadPass {
    let mut blocks = RawBlockSet::with_capacity(count);
    let failure = read_blocks_into(tag, count, &mut blocks, verbose).await.err();
    BlockReadPass { blocks, failure }
}

/// Like `read_blocks`, but appends into `blocks` so a caller that cancels
/// the future (e.g. on a deadline) keeps whatever arrived before the cut.
pub async fn read_blocks_into<T: TagHandle>(
    tag: &mut T,
    count: usize,
    blocks: &mut RawBlockSet,
    verbose: bool,
) -> Result<()> {
    for index in 0..count {
        let index = u8::try_from(index)
            .map_err(|_| Error::InvalidInput(format!("block index {} out of range", index)))?;
        let data = tag.read_block(index).await?;
        if verbose {
            debug!("Block #{} -> {}", index, hex::encode_upper(&data));
        } else {
            trace!("Block #{} -> {} bytes", index, data.len());
        }
        blocks.push(data);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;

    /// Returns `index` repeated, failing at `fail_at`
    struct CountingTag {
        fail_at: Option<u8>,
        reads: Vec<u8>,
    }

    impl TagHandle for CountingTag {
        fn read_block(&mut self, index: u8) -> impl Future<Output = Result<Vec<u8>>> + Send {
            self.reads.push(index);
            let result = if Some(index) == self.fail_at {
                Err(Error::BlockReadFailure {
                    index,
                    reason: "tag lost".to_string(),
                })
            } else {
                Ok(vec![index; 8])
            };
            async move { result }
        }
    }

    #[tokio::test]
    async fn test_reads_all_blocks_in_order() {
        let mut tag = CountingTag { fail_at: None, reads: vec![] };
        let pass = read_blocks(&mut tag, 43, false).await;
        assert!(pass.is_complete());
        assert_eq!(pass.blocks.len(), 43);
        assert_eq!(tag.reads, (0..43).collect::<Vec<u8>>());
        assert_eq!(pass.blocks.get(42), Some(&[42u8; 8][..]));
    }

    #[tokio::test]
    async fn test_failure_aborts_pass_without_retry() {
        let mut tag = CountingTag { fail_at: Some(10), reads: vec![] };
        let pass = read_blocks(&mut tag, 43, true).await;
        assert_eq!(pass.blocks.len(), 10);
        assert!(matches!(
            pass.failure,
            Some(Error::BlockReadFailure { index: 10, .. })
        ));
        // Block 10 attempted once, nothing after it
        assert_eq!(tag.reads.len(), 11);
    }
}
