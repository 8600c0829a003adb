use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use lru::LruCache;

use super::source::{resolve_seek, ByteSource, Origin};
use crate::error::IoError;

/// Default block size: 64KB
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default cache capacity in number of blocks (4MB with the default block size).
pub const DEFAULT_CACHE_BLOCKS: usize = 64;

/// File-backed [`ByteSource`] with a block cache.
///
/// Walking IFDs, ICC tag tables and XMP packets produces many small reads at
/// scattered offsets. The cache turns them into a few block-sized reads:
/// - Fixed-size blocks (default 64KB)
/// - LRU eviction when the cache reaches capacity
/// - Reads spanning multiple blocks are stitched together
pub struct FileSource {
    file: File,
    identifier: String,
    size: u64,
    pos: u64,
    block_size: usize,
    cache: LruCache<u64, Bytes>,
    block_reads: usize,
}

impl FileSource {
    /// Open `path` with the default block size and capacity.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        Self::with_capacity(path, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_BLOCKS)
    }

    /// Open `path` with a custom block size and capacity (both clamped to at least 1).
    pub fn with_capacity(
        path: impl AsRef<Path>,
        block_size: usize,
        capacity: usize,
    ) -> Result<Self, IoError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            identifier: path.display().to_string(),
            size,
            pos: 0,
            block_size: block_size.max(1),
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            block_reads: 0,
        })
    }

    /// Number of blocks fetched from the file so far (cache misses).
    pub fn block_reads(&self) -> usize {
        self.block_reads
    }

    /// Get a block from cache or read it from the file.
    fn get_block(&mut self, block_idx: u64) -> Result<Bytes, IoError> {
        if let Some(data) = self.cache.get(&block_idx) {
            return Ok(data.clone());
        }

        let offset = block_idx * self.block_size as u64;
        let remaining = self.size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::Truncated {
                offset,
                requested: self.block_size as u64,
                size: self.size,
            });
        }

        let len = std::cmp::min(self.block_size as u64, remaining) as usize;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        self.block_reads += 1;

        let data = Bytes::from(buf);
        self.cache.put(block_idx, data.clone());
        Ok(data)
    }

    #[inline]
    fn block_for_offset(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    fn offset_within_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, max_len: usize) -> Result<Bytes, IoError> {
        let len = (max_len as u64).min(self.size - self.pos) as usize;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let offset = self.pos;
        let start_block = self.block_for_offset(offset);
        let end_block = self.block_for_offset(offset + len as u64 - 1);

        let result = if start_block == end_block {
            let block = self.get_block(start_block)?;
            let block_offset = self.offset_within_block(offset);
            block.slice(block_offset..block_offset + len)
        } else {
            let mut result = BytesMut::with_capacity(len);
            let mut remaining = len;
            let mut current_offset = offset;

            for block_idx in start_block..=end_block {
                let block = self.get_block(block_idx)?;
                let block_offset = self.offset_within_block(current_offset);
                let bytes_in_block = std::cmp::min(block.len() - block_offset, remaining);

                result.extend_from_slice(&block[block_offset..block_offset + bytes_in_block]);

                remaining -= bytes_in_block;
                current_offset += bytes_in_block as u64;
            }

            result.freeze()
        };

        self.pos += len as u64;
        Ok(result)
    }

    fn seek(&mut self, offset: i64, origin: Origin) -> Result<u64, IoError> {
        self.pos = resolve_seek(self.pos, self.size, offset, origin)?;
        Ok(self.pos)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
