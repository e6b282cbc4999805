use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// `[offset, offset + page_size)` over the source's key order for one
/// 1-based shard index. Windows of consecutive indices are contiguous and
/// disjoint as long as the source orders by a stable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardWindow {
    pub shard_index: u64,
    pub offset: u64,
    pub page_size: u64,
}

impl ShardWindow {
    pub fn new(shard_index: u64, page_size: u64) -> Result<Self> {
        if shard_index == 0 {
            return Err(PipelineError::InvalidShardIndex(shard_index));
        }
        if page_size == 0 {
            return Err(PipelineError::InvalidPageSize(page_size));
        }
        let offset = (shard_index - 1)
            .checked_mul(page_size)
            .filter(|offset| offset.checked_add(page_size).is_some())
            .ok_or(PipelineError::OffsetOverflow {
                shard_index,
                page_size,
            })?;

        Ok(Self {
            shard_index,
            offset,
            page_size,
        })
    }

    /// Exclusive upper bound of the window.
    pub fn end(&self) -> u64 {
        self.offset + self.page_size
    }
}
