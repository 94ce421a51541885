use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};
use crate::io::aligned::{page_round_up, AlignedBuf, BufferPool};
use crate::io::async_file::{AsyncFile, PosixFile};
use crate::io::checksum::crc16;
use crate::io::compressor::CompressorType;
use crate::layout::block::{Block, BlockWriter};
use crate::layout::callback::BlockingCallback;
use crate::layout::directory::BlockDirectory;
use crate::layout::holes::{Hole, HoleList};
use crate::layout::superblock::{SuperBlock, SUPER_BLOCK_SIZE};
use crate::layout::{is_leaf, Bid, BlockMeta};
use crate::obs::logger::Logger;
use crate::options::options::Options;
use crate::statistics::LayoutStatistics;
use crate::{debug, error, event, info, warn};

/// Counters guarded by the engine mutex: the logical end of data, the
/// physical file length and the in-flight request counts.
struct FileState {
    /// Logical end-of-data. Extents and holes all lie below it.
    offset: u64,
    /// Physical file length, never below `offset` after a truncate.
    length: u64,
    fly_reads: u64,
    fly_writes: u64,
}

/// The storage layout engine: maps block ids to page-aligned extents of a
/// single data file, persists the mapping through a superblock and an index
/// block, and recycles the space freed by deletions and rewrites.
///
/// Three locks cover the mutable state: the engine mutex (offsets and
/// in-flight counters), the directory mutex and the hole-list mutex. The
/// directory lock may be taken before either of the others; the engine and
/// hole-list locks are never held together, and no lock is held across a
/// file call.
pub struct BlockStore {
    file: Arc<dyn AsyncFile>,
    compress: CompressorType,
    logger: Arc<dyn Logger>,
    stats: Arc<LayoutStatistics>,
    pool: BufferPool,
    directory: BlockDirectory,
    holes: HoleList,
    superblock: Mutex<SuperBlock>,
    state: Mutex<FileState>,
    write_quiesced: Condvar,
    /// Set when the directory diverges from the persisted index block.
    index_dirty: AtomicBool,
    /// Guards the shutdown flush: an engine that failed `init` has nothing
    /// worth persisting.
    initialized: AtomicBool,
}

impl BlockStore {
    /// Opens or creates the data file at `path` and recovers the engine from
    /// it.
    pub fn open(
        path: &Path,
        create: bool,
        options: &Options,
        logger: Arc<dyn Logger>,
    ) -> Result<Arc<BlockStore>> {
        let file = PosixFile::open(path, create, options.layout_options().io_threads())?;
        Self::with_file(Arc::new(file), create, options, logger)
    }

    /// Builds the engine over an already opened file.
    pub fn with_file(
        file: Arc<dyn AsyncFile>,
        create: bool,
        options: &Options,
        logger: Arc<dyn Logger>,
    ) -> Result<Arc<BlockStore>> {
        let layout_options = options.layout_options();
        let compress = layout_options.compressor_type();
        let length = file.len()?;

        let store = Arc::new(BlockStore {
            file,
            compress,
            logger,
            stats: LayoutStatistics::new(),
            pool: BufferPool::new(layout_options.buffer_pool_capacity().to_bytes()),
            directory: BlockDirectory::new(),
            holes: HoleList::new(),
            superblock: Mutex::new(SuperBlock::new(compress)),
            state: Mutex::new(FileState { offset: 0, length, fly_reads: 0, fly_writes: 0 }),
            write_quiesced: Condvar::new(),
            index_dirty: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        });
        store.init(create)?;
        Ok(store)
    }

    fn init(&self, create: bool) -> Result<()> {
        if create {
            self.flush_superblock()?;
            let mut state = self.state.lock().unwrap();
            state.offset = 2 * SUPER_BLOCK_SIZE;
            if state.length < state.offset {
                state.length = state.offset;
            }
            drop(state);
        } else {
            let length = self.state.lock().unwrap().length;
            if length < 2 * SUPER_BLOCK_SIZE {
                return Err(Error::FileTooShort { length });
            }
            self.load_superblock()?;

            let (stored, index_meta) = {
                let superblock = self.superblock.lock().unwrap();
                (superblock.compress, superblock.index_block_meta)
            };
            if stored != self.compress {
                return Err(Error::ConfigMismatch { configured: self.compress, stored });
            }

            if let Some(meta) = &index_meta {
                self.load_index(meta)?;
                self.directory.reindex_index_extent(None, Some(meta.offset));
            }
            self.init_holes(index_meta.as_ref());
            self.log_recovery_info();
        }

        self.truncate()?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Synchronously reads a block. Unknown bids and failed reads both come
    /// back as `None`; the distinction is logged.
    pub fn read(&self, bid: Bid) -> Option<Block> {
        let meta = match self.directory.get(bid) {
            Some(meta) => meta,
            None => {
                info!(self.logger, "read block failed, no such bid {:#x}", bid);
                return None;
            }
        };

        match self.read_block(&meta) {
            Ok(block) => {
                event!(
                    self.logger,
                    "block read, bid={:#x}, offset={}, compressed={}, inflated={}",
                    bid, meta.offset, meta.compressed_size, meta.inflated_size
                );
                self.stats.block_reads.inc(1);
                Some(block)
            }
            Err(e) => {
                error!(
                    self.logger,
                    "read of block {:#x} at offset {} failed: {}",
                    bid, meta.offset, e
                );
                self.stats.read_failures.inc(1);
                None
            }
        }
    }

    /// Queues a read of `bid`; the callback receives the inflated block from
    /// an I/O thread.
    pub fn async_read<F>(self: &Arc<Self>, bid: Bid, callback: F)
    where
        F: FnOnce(Result<Block>) + Send + 'static,
    {
        let meta = match self.directory.get(bid) {
            Some(meta) => meta,
            None => {
                info!(self.logger, "read block failed, no such bid {:#x}", bid);
                callback(Err(Error::BlockNotFound(bid)));
                return;
            }
        };

        let buffer = self.pool.alloc(meta.compressed_size as usize);
        self.state.lock().unwrap().fly_reads += 1;

        let engine = self.clone();
        self.file.async_read(
            meta.offset,
            buffer,
            Box::new(move |buffer, status| {
                engine.complete_async_read(bid, meta, buffer, status, callback);
            }),
        );
    }

    fn complete_async_read<F>(
        &self,
        bid: Bid,
        meta: BlockMeta,
        buffer: AlignedBuf,
        status: std::io::Result<()>,
        callback: F,
    ) where
        F: FnOnce(Result<Block>),
    {
        let result = match status {
            Ok(()) => {
                self.stats.bytes_read.inc(buffer.len() as u64);
                self.inflate(buffer, &meta)
            }
            Err(e) => {
                self.pool.free(buffer);
                Err(e.into())
            }
        };

        match &result {
            Ok(_) => {
                event!(
                    self.logger,
                    "block read, bid={:#x}, offset={}, compressed={}, inflated={}",
                    bid, meta.offset, meta.compressed_size, meta.inflated_size
                );
                self.stats.block_reads.inc(1);
            }
            Err(e) => {
                error!(
                    self.logger,
                    "async read of block {:#x} at offset {} failed: {}",
                    bid, meta.offset, e
                );
                self.stats.read_failures.inc(1);
            }
        }

        self.state.lock().unwrap().fly_reads -= 1;
        callback(result);
    }

    /// Queues a write of `block` under `bid`. The extent is reserved up
    /// front and handed back to the free list if the transfer fails; the
    /// directory entry only changes on success.
    ///
    /// Concurrent writes to the same bid are not serialized here: the last
    /// completion wins and reclaims the loser's extent.
    ///
    /// # Panics
    /// The block's buffer capacity must equal `page_round_up(block.size())`.
    pub fn async_write<F>(self: &Arc<Self>, bid: Bid, block: Block, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        assert_eq!(
            block.limit(),
            page_round_up(block.size()),
            "write blocks must carry a page-rounded buffer"
        );

        let inflated_size = block.size() as u32;
        self.stats.inflated_bytes_written.inc(inflated_size as u64);

        let (buffer, compressed_size) = self.deflate(block);
        self.stats.compressed_bytes_written.inc(compressed_size as u64);

        let crc = crc16(&buffer[..compressed_size as usize]);
        let offset = self.get_offset(buffer.len() as u64);
        let meta = BlockMeta { offset, inflated_size, compressed_size, crc };

        self.state.lock().unwrap().fly_writes += 1;

        let engine = self.clone();
        self.file.async_write(
            offset,
            buffer,
            Box::new(move |buffer, status| {
                engine.complete_async_write(bid, meta, buffer, status, callback);
            }),
        );
    }

    fn complete_async_write<F>(
        &self,
        bid: Bid,
        meta: BlockMeta,
        buffer: AlignedBuf,
        status: std::io::Result<()>,
        callback: F,
    ) where
        F: FnOnce(Result<()>),
    {
        let result = match status {
            Ok(()) => {
                self.stats.bytes_written.inc(buffer.len() as u64);
                self.set_block_meta(bid, meta);
                event!(
                    self.logger,
                    "block written, bid={:#x}, offset={}, compressed={}, inflated={}",
                    bid, meta.offset, meta.compressed_size, meta.inflated_size
                );
                self.stats.block_writes.inc(1);
                Ok(())
            }
            Err(e) => {
                error!(
                    self.logger,
                    "write of block {:#x} at offset {} failed: {}",
                    bid, meta.offset, e
                );
                self.release_extent(meta.offset, meta.extent_size());
                self.stats.write_failures.inc(1);
                Err(e.into())
            }
        };

        self.pool.free(buffer);

        // The flush path must only observe zero in-flight writes once the
        // directory change landed and the buffer was returned.
        let mut state = self.state.lock().unwrap();
        state.fly_writes -= 1;
        if state.fly_writes == 0 {
            self.write_quiesced.notify_all();
        }
        drop(state);

        callback(result);
    }

    /// Blocking wrapper over [`async_write`](Self::async_write).
    pub fn write(self: &Arc<Self>, bid: Bid, block: Block) -> Result<()> {
        let callback = BlockingCallback::new();
        self.async_write(bid, block, callback.notifier());
        callback.wait()?
    }

    /// Removes `bid` from the directory and frees its extent. Unknown bids
    /// are logged and ignored.
    pub fn delete_block(&self, bid: Bid) {
        match self.directory.remove(bid) {
            Some(hole) => {
                self.index_dirty.store(true, Ordering::Release);
                self.release_extent(hole.offset, hole.size);
                self.stats.blocks_deleted.inc(1);
                debug!(
                    self.logger,
                    "block {:#x} deleted, extent at {} of {} bytes released",
                    bid, hole.offset, hole.size
                );
            }
            None => {
                error!(self.logger, "delete block failed, no such bid {:#x}", bid);
            }
        }
    }

    /// Waits for in-flight writes to drain, then persists the index block
    /// and the superblock and trims the file to the logical end of data.
    ///
    /// Writes completed before the flush started are durable in the
    /// directory once this returns.
    pub fn flush(&self) -> Result<()> {
        event!(self.logger, "flush start");
        self.wait_write_quiescence();

        self.flush_index()?;
        self.flush_superblock()?;
        self.truncate()?;

        self.stats.flushes.inc(1);
        event!(self.logger, "flush done");
        Ok(())
    }

    /// An empty block backed by a pooled buffer of `page_round_up(capacity)`
    /// bytes, satisfying the write-path buffer contract once filled.
    pub fn create_block(&self, capacity: usize) -> Block {
        Block::new(self.pool.alloc(capacity), 0)
    }

    /// Metadata currently recorded for `bid`.
    pub fn block_meta(&self, bid: Bid) -> Option<BlockMeta> {
        self.directory.get(bid)
    }

    /// Location of the persisted directory, if one was flushed.
    pub fn index_meta(&self) -> Option<BlockMeta> {
        self.superblock.lock().unwrap().index_block_meta
    }

    pub fn block_count(&self) -> usize {
        self.directory.len()
    }

    /// The current free extents, for diagnostics.
    pub fn holes(&self) -> Vec<Hole> {
        self.holes.snapshot()
    }

    /// The logical end-of-data offset.
    pub fn end_offset(&self) -> u64 {
        self.state.lock().unwrap().offset
    }

    pub fn statistics(&self) -> Arc<LayoutStatistics> {
        self.stats.clone()
    }

    fn wait_write_quiescence(&self) {
        let mut state = self.state.lock().unwrap();
        while state.fly_writes > 0 {
            state = self.write_quiesced.wait(state).unwrap();
        }
    }

    fn load_superblock(&self) -> Result<()> {
        let first = match self.read_superblock_slot(0) {
            Ok(superblock) => {
                debug!(self.logger, "first superblock copy loaded");
                *self.superblock.lock().unwrap() = superblock;
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(
            self.logger,
            "first superblock copy is unusable, trying the second: {}", first
        );

        match self.read_superblock_slot(SUPER_BLOCK_SIZE) {
            Ok(superblock) => {
                debug!(self.logger, "second superblock copy loaded");
                *self.superblock.lock().unwrap() = superblock;
                Ok(())
            }
            Err(second) => Err(Error::InvalidImage(format!(
                "both superblock copies are unusable: {}; {}",
                first, second
            ))),
        }
    }

    fn read_superblock_slot(&self, offset: u64) -> std::io::Result<SuperBlock> {
        let mut buffer = self.pool.alloc(SUPER_BLOCK_SIZE as usize);
        let result = self
            .read_data(offset, &mut buffer)
            .and_then(|_| SuperBlock::decode(buffer.as_slice()));
        self.pool.free(buffer);
        result
    }

    /// Encodes the current superblock and writes it to both slots. Either
    /// failure aborts; the previous on-disk image stays recoverable through
    /// the untouched slot.
    fn flush_superblock(&self) -> Result<()> {
        let buffer = {
            let mut block = Block::new(self.pool.alloc(SUPER_BLOCK_SIZE as usize), 0);
            self.superblock.lock().unwrap().encode(&mut block);
            block.into_buf()
        };

        if let Err(e) = self.write_data(0, &buffer) {
            error!(self.logger, "flush of the first superblock copy failed: {}", e);
            self.pool.free(buffer);
            return Err(e.into());
        }
        if let Err(e) = self.write_data(SUPER_BLOCK_SIZE, &buffer) {
            error!(self.logger, "flush of the second superblock copy failed: {}", e);
            self.pool.free(buffer);
            return Err(e.into());
        }

        self.pool.free(buffer);
        self.stats.superblock_flushes.inc(1);
        debug!(self.logger, "superblock flushed to both copies");
        Ok(())
    }

    /// Serializes the directory into a freshly allocated extent and points
    /// the in-memory superblock at it. The previous index extent is released
    /// only after the new one landed, so a torn write leaves the advertised
    /// image intact.
    ///
    /// Rewriting is skipped when the directory did not change since the last
    /// successful index flush, which also keeps repeated flushes
    /// byte-identical on disk.
    fn flush_index(&self) -> Result<()> {
        let dirty = self.index_dirty.swap(false, Ordering::AcqRel);
        if !dirty && self.superblock.lock().unwrap().index_block_meta.is_some() {
            debug!(self.logger, "directory unchanged, keeping the current index block");
            return Ok(());
        }

        let size = self.directory.index_size();
        let mut block = Block::new(self.pool.alloc(size), 0);
        self.directory.write_index(&mut BlockWriter::new(&mut block));
        assert_eq!(block.size(), size, "directory changed during a quiesced flush");

        let entries = self.directory.len();
        let inflated_size = size as u32;
        let (buffer, compressed_size) = self.deflate(block);
        let crc = crc16(&buffer[..compressed_size as usize]);

        let offset = self.get_offset(buffer.len() as u64);
        if let Err(e) = self.write_data(offset, &buffer) {
            error!(self.logger, "flush of the index block failed: {}", e);
            self.release_extent(offset, buffer.len() as u64);
            self.pool.free(buffer);
            self.index_dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        self.pool.free(buffer);

        let new_meta = BlockMeta { offset, inflated_size, compressed_size, crc };
        let old_meta = {
            let mut superblock = self.superblock.lock().unwrap();
            std::mem::replace(&mut superblock.index_block_meta, Some(new_meta))
        };
        self.directory.reindex_index_extent(old_meta.map(|meta| meta.offset), Some(offset));
        if let Some(old) = old_meta {
            self.release_extent(old.offset, old.extent_size());
        }

        self.stats.index_flushes.inc(1);
        debug!(
            self.logger,
            "index block flushed, {} entries at offset {}", entries, offset
        );
        Ok(())
    }

    fn load_index(&self, meta: &BlockMeta) -> Result<()> {
        debug!(self.logger, "reading the index block at offset {}", meta.offset);
        let block = self.read_block(meta).map_err(|e| {
            Error::InvalidImage(format!(
                "index block at offset {} is unusable: {}",
                meta.offset, e
            ))
        })?;
        let count = self
            .directory
            .read_index(block.buf())
            .map_err(|e| Error::InvalidImage(format!("invalid index block: {}", e)))?;
        info!(self.logger, "{} blocks found", count);
        Ok(())
    }

    /// Rebuilds the free list as the complement of the used extents within
    /// `[2 * SUPER_BLOCK_SIZE, end of data)` and positions the end-of-data
    /// cursor after the last extent.
    fn init_holes(&self, index_meta: Option<&BlockMeta>) {
        let extents = self.directory.used_extents(index_meta);

        let mut last = 2 * SUPER_BLOCK_SIZE;
        for (offset, size) in &extents {
            assert!(*offset >= last, "extents overlap in the recovered image");
            if *offset > last {
                let gap = offset - last;
                self.holes.release(last, gap);
                self.stats.holes_created.inc(1);
                self.stats.hole_bytes.inc(gap);
            }
            last = offset + size;
        }

        self.state.lock().unwrap().offset = last;
    }

    fn log_recovery_info(&self) {
        let mut inner = (0u64, 0u64, 0u64);
        let mut leaf = (0u64, 0u64, 0u64);
        for (bid, meta) in self.directory.snapshot() {
            let bucket = if is_leaf(bid) { &mut leaf } else { &mut inner };
            bucket.0 += 1;
            bucket.1 += meta.inflated_size as u64;
            bucket.2 += meta.compressed_size as u64;
        }
        info!(
            self.logger,
            "recovered {} inner blocks, {} inflated bytes, {} compressed bytes",
            inner.0, inner.1, inner.2
        );
        info!(
            self.logger,
            "recovered {} leaf blocks, {} inflated bytes, {} compressed bytes",
            leaf.0, leaf.1, leaf.2
        );
    }

    fn read_block(&self, meta: &BlockMeta) -> Result<Block> {
        let mut buffer = self.pool.alloc(meta.compressed_size as usize);
        if let Err(e) = self.read_data(meta.offset, &mut buffer) {
            self.pool.free(buffer);
            return Err(e.into());
        }
        self.inflate(buffer, meta)
    }

    /// Verifies and decompresses a raw extent. Without compression the read
    /// buffer becomes the block payload outright; otherwise it is returned
    /// to the pool after inflating.
    fn inflate(&self, buffer: AlignedBuf, meta: &BlockMeta) -> Result<Block> {
        let crc = crc16(&buffer[..meta.compressed_size as usize]);
        if crc != meta.crc {
            self.pool.free(buffer);
            return Err(Error::Corruption(format!(
                "block at offset {} failed its checksum: expected {:#06x} was {:#06x}",
                meta.offset, meta.crc, crc
            )));
        }

        match self.compress {
            CompressorType::Noop => Ok(Block::new(buffer, meta.inflated_size as usize)),
            CompressorType::Snappy => {
                let inflated_size = meta.inflated_size as usize;
                let mut output = self.pool.alloc(inflated_size);
                let result = self.compress.decompress_into(
                    &buffer[..meta.compressed_size as usize],
                    &mut output[..inflated_size],
                );
                self.pool.free(buffer);

                match result {
                    Ok(n) if n == inflated_size => Ok(Block::new(output, n)),
                    Ok(n) => {
                        self.pool.free(output);
                        Err(Error::Corruption(format!(
                            "block at offset {} inflated to {} bytes, expected {}",
                            meta.offset, n, inflated_size
                        )))
                    }
                    Err(e) => {
                        self.pool.free(output);
                        Err(Error::Corruption(format!(
                            "block at offset {} failed to decompress: {}",
                            meta.offset, e
                        )))
                    }
                }
            }
        }
    }

    /// Compresses a block into a write buffer sized to whole pages,
    /// returning the buffer and the payload size before rounding. Consumes
    /// the block; without compression its buffer is transferred as-is.
    fn deflate(&self, block: Block) -> (AlignedBuf, u32) {
        match self.compress {
            CompressorType::Noop => {
                let size = block.size();
                (block.into_buf(), size as u32)
            }
            CompressorType::Snappy => {
                let mut output = self.pool.alloc(self.compress.max_compressed_len(block.size()));
                let compressed_size = self
                    .compress
                    .compress_into(block.buf(), output.as_mut_slice())
                    .expect("compression failed on a buffer it just sized");
                output.truncate(page_round_up(compressed_size));
                self.pool.free(block.into_buf());
                (output, compressed_size as u32)
            }
        }
    }

    /// Installs new metadata for `bid` and frees the extent it previously
    /// occupied.
    fn set_block_meta(&self, bid: Bid, meta: BlockMeta) {
        let freed = self.directory.set(bid, meta);
        self.index_dirty.store(true, Ordering::Release);
        if let Some(hole) = freed {
            self.release_extent(hole.offset, hole.size);
        }
    }

    /// Picks a page-aligned extent: free-list first, the file tail
    /// otherwise.
    fn get_offset(&self, size: u64) -> u64 {
        if let Some(offset) = self.holes.allocate(size) {
            self.stats.hole_bytes.dec(size);
            return offset;
        }

        let mut state = self.state.lock().unwrap();
        let offset = state.offset;
        state.offset += size;
        // offset can sit below length when tail extents were reclaimed since
        // the last truncate.
        if state.offset > state.length {
            state.length = state.offset;
        }
        offset
    }

    /// Returns an extent to the allocator. An extent ending at the logical
    /// end of data retracts the end instead of entering the free list.
    fn release_extent(&self, offset: u64, size: u64) {
        {
            let mut state = self.state.lock().unwrap();
            if offset + size == state.offset {
                state.offset = offset;
                self.stats.tail_reclaims.inc(1);
                return;
            }
        }

        // The engine and hole-list locks are never held together.
        self.holes.release(offset, size);
        self.stats.holes_created.inc(1);
        self.stats.hole_bytes.inc(size);
    }

    fn read_data(&self, offset: u64, buffer: &mut AlignedBuf) -> std::io::Result<()> {
        self.state.lock().unwrap().fly_reads += 1;
        let result = self.file.read(offset, buffer);
        self.state.lock().unwrap().fly_reads -= 1;

        match &result {
            Ok(()) => self.stats.bytes_read.inc(buffer.len() as u64),
            Err(e) => error!(
                self.logger,
                "read of {} bytes at offset {} failed: {}",
                buffer.len(), offset, e
            ),
        }
        result
    }

    fn write_data(&self, offset: u64, buffer: &AlignedBuf) -> std::io::Result<()> {
        self.state.lock().unwrap().fly_writes += 1;
        let result = self.file.write(offset, buffer);

        let mut state = self.state.lock().unwrap();
        state.fly_writes -= 1;
        if state.fly_writes == 0 {
            self.write_quiesced.notify_all();
        }
        drop(state);

        match &result {
            Ok(()) => self.stats.bytes_written.inc(buffer.len() as u64),
            Err(e) => error!(
                self.logger,
                "write of {} bytes at offset {} failed: {}",
                buffer.len(), offset, e
            ),
        }
        result
    }

    /// Trims the physical file down to the logical end of data.
    fn truncate(&self) -> std::io::Result<()> {
        let target = {
            let mut state = self.state.lock().unwrap();
            if state.offset < state.length {
                state.length = state.offset;
                Some(state.offset)
            } else {
                None
            }
        };

        if let Some(new_length) = target {
            // The lock is not held across the call; an allocation racing
            // past the new end re-extends the file on its first write.
            self.file.truncate(new_length)?;
            debug!(self.logger, "data file truncated to {} bytes", new_length);
        }
        Ok(())
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        if !self.initialized.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.flush() {
            error!(self.logger, "flush on shutdown failed, data would be lost: {}", e);
            if !std::thread::panicking() {
                panic!("flush on shutdown failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::callback::BlockingCallback;
    use crate::obs::logger;
    use crate::options::options::LayoutOptions;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    const PAGE: u64 = crate::io::aligned::PAGE_SIZE as u64;

    fn options_with(compressor: CompressorType) -> Options {
        Options::default().with_layout_options(
            LayoutOptions::default()
                .with_compressor_type(compressor)
                .with_io_threads(2),
        )
    }

    fn open_store(path: &Path, create: bool, compressor: CompressorType) -> Result<Arc<BlockStore>> {
        BlockStore::open(path, create, &options_with(compressor), logger::test_instance())
    }

    fn block_of(payload: &[u8]) -> Block {
        let mut block = Block::with_capacity(payload.len());
        BlockWriter::new(&mut block).write_slice(payload);
        block
    }

    fn overwrite_range(path: &Path, offset: u64, byte: u8, len: usize) {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&vec![byte; len]).unwrap();
    }

    /// Every byte in `[2 * SUPER_BLOCK_SIZE, end_offset)` must belong to
    /// exactly one live extent or one hole.
    fn assert_extents_partition_file(store: &Arc<BlockStore>, bids: &[Bid]) {
        let mut extents: Vec<(u64, u64)> = bids
            .iter()
            .filter_map(|bid| store.block_meta(*bid))
            .map(|meta| (meta.offset, meta.extent_size()))
            .collect();
        if let Some(meta) = store.index_meta() {
            extents.push((meta.offset, meta.extent_size()));
        }
        extents.extend(store.holes().iter().map(|hole| (hole.offset, hole.size)));
        extents.sort();

        let mut last = 2 * SUPER_BLOCK_SIZE;
        for (offset, size) in extents {
            assert_eq!(offset, last, "gap or overlap at offset {}", offset);
            last = offset + size;
        }
        assert_eq!(last, store.end_offset());
    }

    #[test]
    fn test_write_read_round_trip_noop() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Noop).unwrap();

        let mut block = store.create_block(4);
        BlockWriter::new(&mut block).write_slice(b"AAAA");
        store.write(1, block).unwrap();
        let block = store.read(1).unwrap();
        assert_eq!(block.buf(), b"AAAA");

        let stats = store.statistics();
        assert_eq!(stats.block_writes.get(), 1);
        assert_eq!(stats.block_reads.get(), 1);
    }

    #[test]
    fn test_write_read_round_trip_snappy() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Snappy).unwrap();

        let payload: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        store.write(42, block_of(&payload)).unwrap();
        let block = store.read(42).unwrap();
        assert_eq!(block.buf(), payload.as_slice());
    }

    #[test]
    fn test_read_unknown_bid() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Noop).unwrap();
        assert!(store.read(99).is_none());
        assert!(store.block_meta(99).is_none());
    }

    #[test]
    fn test_snappy_records_compressed_size() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Snappy).unwrap();

        store.write(0x10, block_of(&vec![b'x'; 8192])).unwrap();

        let meta = store.block_meta(0x10).unwrap();
        assert_eq!(meta.inflated_size, 8192);
        assert!(meta.compressed_size < 8192);
        assert_eq!(meta.extent_size(), page_round_up(meta.compressed_size as usize) as u64);
        assert_eq!(store.end_offset(), 2 * SUPER_BLOCK_SIZE + meta.extent_size());
    }

    #[test]
    fn test_delete_reclaims_tail() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Noop).unwrap();

        assert_eq!(store.end_offset(), 2 * SUPER_BLOCK_SIZE);
        store.write(1, block_of(b"AAAA")).unwrap();
        assert_eq!(store.end_offset(), 2 * SUPER_BLOCK_SIZE + PAGE);

        store.delete_block(1);
        assert_eq!(store.end_offset(), 2 * SUPER_BLOCK_SIZE);
        assert!(store.holes().is_empty());
        assert_eq!(store.statistics().tail_reclaims.get(), 1);
    }

    #[test]
    fn test_delete_unknown_bid_is_ignored() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Noop).unwrap();
        store.delete_block(5);
        assert_eq!(store.end_offset(), 2 * SUPER_BLOCK_SIZE);
    }

    #[test]
    fn test_deletes_coalesce_into_one_hole() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Noop).unwrap();

        for bid in 1..=4 {
            store.write(bid, block_of(&vec![bid as u8; 8192])).unwrap();
        }
        let start = 2 * SUPER_BLOCK_SIZE;
        assert_eq!(store.end_offset(), start + 4 * 8192);

        store.delete_block(1);
        store.delete_block(3);
        assert_eq!(store.holes().len(), 2);

        store.delete_block(2);
        assert_eq!(
            store.holes(),
            vec![Hole { offset: start, size: 3 * 8192 }]
        );
        assert_extents_partition_file(&store, &[4]);
    }

    #[test]
    fn test_rewrite_frees_previous_extent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Noop).unwrap();

        store.write(1, block_of(&vec![1; 8192])).unwrap();
        store.write(2, block_of(&vec![2; 8192])).unwrap();
        let first = store.block_meta(1).unwrap();

        store.write(1, block_of(&vec![3; 4096])).unwrap();
        let second = store.block_meta(1).unwrap();
        assert_ne!(first.offset, second.offset);

        // The old extent is free again and gets reused by the next write.
        assert_eq!(store.holes(), vec![Hole { offset: first.offset, size: 8192 }]);
        store.write(3, block_of(&vec![4; 8192])).unwrap();
        assert_eq!(store.block_meta(3).unwrap().offset, first.offset);
        assert!(store.holes().is_empty());

        assert_eq!(store.read(1).unwrap().buf(), vec![3; 4096].as_slice());
        assert_extents_partition_file(&store, &[1, 2, 3]);
    }

    #[test]
    fn test_flush_and_reopen_recovers_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = open_store(&path, true, CompressorType::Noop).unwrap();
            store.write(1, block_of(b"AAAA")).unwrap();
            store.write(2, block_of(&vec![7; 5000])).unwrap();
            store.flush().unwrap();
        }

        let store = open_store(&path, false, CompressorType::Noop).unwrap();
        assert_eq!(store.block_count(), 2);
        assert_eq!(store.read(1).unwrap().buf(), b"AAAA");
        assert_eq!(store.read(2).unwrap().buf(), vec![7; 5000].as_slice());
    }

    #[test]
    fn test_drop_flushes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = open_store(&path, true, CompressorType::Snappy).unwrap();
            store.write(9, block_of(&vec![b'z'; 10_000])).unwrap();
            // No explicit flush: the drop must persist the directory.
        }

        let store = open_store(&path, false, CompressorType::Snappy).unwrap();
        assert_eq!(store.read(9).unwrap().buf(), vec![b'z'; 10_000].as_slice());
    }

    #[test]
    fn test_reopen_recovers_holes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = open_store(&path, true, CompressorType::Noop).unwrap();
            for bid in 1..=3 {
                store.write(bid, block_of(&vec![bid as u8; 8192])).unwrap();
            }
            store.delete_block(2);
            store.flush().unwrap();
        }

        let store = open_store(&path, false, CompressorType::Noop).unwrap();
        assert_eq!(store.block_count(), 2);
        assert_eq!(store.read(1).unwrap().buf(), vec![1; 8192].as_slice());
        assert_eq!(store.read(3).unwrap().buf(), vec![3; 8192].as_slice());
        assert_extents_partition_file(&store, &[1, 3]);

        // The reclaimed space is reused before the file grows again.
        let end = store.end_offset();
        store.write(4, block_of(&vec![4; 4096])).unwrap();
        assert_eq!(store.end_offset(), end);
    }

    #[test]
    fn test_recovery_from_second_superblock_copy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = open_store(&path, true, CompressorType::Noop).unwrap();
            store.write(1, block_of(b"survivor")).unwrap();
        }

        overwrite_range(&path, 0, 0xFF, SUPER_BLOCK_SIZE as usize);

        let store = open_store(&path, false, CompressorType::Noop).unwrap();
        assert_eq!(store.read(1).unwrap().buf(), b"survivor");
    }

    #[test]
    fn test_recovery_from_first_superblock_copy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = open_store(&path, true, CompressorType::Noop).unwrap();
            store.write(1, block_of(b"survivor")).unwrap();
        }

        overwrite_range(&path, SUPER_BLOCK_SIZE, 0, SUPER_BLOCK_SIZE as usize);

        let store = open_store(&path, false, CompressorType::Noop).unwrap();
        assert_eq!(store.read(1).unwrap().buf(), b"survivor");
    }

    #[test]
    fn test_both_superblocks_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = open_store(&path, true, CompressorType::Noop).unwrap();
            store.write(1, block_of(b"gone")).unwrap();
        }

        overwrite_range(&path, 0, 0xFF, 2 * SUPER_BLOCK_SIZE as usize);

        match open_store(&path, false, CompressorType::Noop) {
            Err(Error::InvalidImage(_)) => {}
            other => panic!("expected InvalidImage, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_compression_mismatch_fails_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            open_store(&path, true, CompressorType::Noop).unwrap();
        }

        match open_store(&path, false, CompressorType::Snappy) {
            Err(Error::ConfigMismatch { configured, stored }) => {
                assert_eq!(configured, CompressorType::Snappy);
                assert_eq!(stored, CompressorType::Noop);
            }
            other => panic!("expected ConfigMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_short_file_fails_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, vec![0; 1000]).unwrap();

        match open_store(&path, false, CompressorType::Noop) {
            Err(Error::FileTooShort { length }) => assert_eq!(length, 1000),
            other => panic!("expected FileTooShort, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_flush_is_idempotent_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        let store = open_store(&path, true, CompressorType::Snappy).unwrap();
        store.write(1, block_of(&vec![5; 6000])).unwrap();
        store.write(2, block_of(b"small")).unwrap();

        store.flush().unwrap();
        let first = std::fs::read(&path).unwrap();

        store.flush().unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);

        let stats = store.statistics();
        assert_eq!(stats.flushes.get(), 2);
        assert_eq!(stats.index_flushes.get(), 1);
    }

    #[test]
    fn test_flush_truncates_reclaimed_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        let store = open_store(&path, true, CompressorType::Noop).unwrap();
        store.write(1, block_of(&vec![1; 8192])).unwrap();
        store.write(2, block_of(&vec![2; 8192])).unwrap();
        store.delete_block(2);
        store.delete_block(1);

        store.flush().unwrap();

        // Only the superblocks and the index block remain.
        let expected = 2 * SUPER_BLOCK_SIZE + store.index_meta().unwrap().extent_size();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn test_async_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Snappy).unwrap();

        store.write(3, block_of(b"async payload")).unwrap();

        let callback = BlockingCallback::new();
        store.async_read(3, callback.notifier());
        let block = callback.wait().unwrap().unwrap();
        assert_eq!(block.buf(), b"async payload");
    }

    #[test]
    fn test_async_read_unknown_bid() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("data"), true, CompressorType::Noop).unwrap();

        let callback = BlockingCallback::new();
        store.async_read(17, callback.notifier());
        match callback.wait().unwrap() {
            Err(Error::BlockNotFound(bid)) => assert_eq!(bid, 17),
            other => panic!("expected BlockNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_corrupted_block_fails_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        let store = open_store(&path, true, CompressorType::Noop).unwrap();
        store.write(1, block_of(&vec![9; 4096])).unwrap();
        let meta = store.block_meta(1).unwrap();

        overwrite_range(&path, meta.offset, 0xEE, 16);

        assert!(store.read(1).is_none());
        assert_eq!(store.statistics().read_failures.get(), 1);
    }

    /// Fault-injecting wrapper: fails every write while `fail_writes` is set.
    struct FlakyFile {
        inner: PosixFile,
        fail_writes: AtomicBool,
    }

    impl FlakyFile {
        fn injected_error() -> std::io::Error {
            std::io::Error::new(std::io::ErrorKind::Other, "injected write failure")
        }
    }

    impl AsyncFile for FlakyFile {
        fn read(&self, offset: u64, buf: &mut AlignedBuf) -> std::io::Result<()> {
            self.inner.read(offset, buf)
        }

        fn write(&self, offset: u64, buf: &AlignedBuf) -> std::io::Result<()> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(Self::injected_error());
            }
            self.inner.write(offset, buf)
        }

        fn async_read(&self, offset: u64, buf: AlignedBuf, complete: crate::io::async_file::IoCompletion) {
            self.inner.async_read(offset, buf, complete);
        }

        fn async_write(&self, offset: u64, buf: AlignedBuf, complete: crate::io::async_file::IoCompletion) {
            if self.fail_writes.load(Ordering::Relaxed) {
                complete(buf, Err(Self::injected_error()));
                return;
            }
            self.inner.async_write(offset, buf, complete);
        }

        fn truncate(&self, new_length: u64) -> std::io::Result<()> {
            self.inner.truncate(new_length)
        }

        fn len(&self) -> std::io::Result<u64> {
            self.inner.len()
        }
    }

    #[test]
    fn test_failed_write_rolls_back_allocation() {
        let dir = tempdir().unwrap();
        let file = Arc::new(FlakyFile {
            inner: PosixFile::open(&dir.path().join("data"), true, 1).unwrap(),
            fail_writes: AtomicBool::new(false),
        });
        let store = BlockStore::with_file(
            file.clone(),
            true,
            &options_with(CompressorType::Noop),
            logger::test_instance(),
        )
        .unwrap();

        store.write(1, block_of(b"first version")).unwrap();
        let meta = store.block_meta(1).unwrap();
        let end = store.end_offset();

        file.fail_writes.store(true, Ordering::Relaxed);
        assert!(store.write(1, block_of(b"doomed version")).is_err());
        file.fail_writes.store(false, Ordering::Relaxed);

        // The reserved extent went back to the allocator and the previous
        // entry survived.
        assert_eq!(store.block_meta(1), Some(meta));
        assert_eq!(store.end_offset(), end);
        assert!(store.holes().is_empty());
        assert_eq!(store.read(1).unwrap().buf(), b"first version");
        assert_eq!(store.statistics().write_failures.get(), 1);
    }

    #[test]
    fn test_failed_flush_keeps_index_dirty() {
        let dir = tempdir().unwrap();
        let file = Arc::new(FlakyFile {
            inner: PosixFile::open(&dir.path().join("data"), true, 1).unwrap(),
            fail_writes: AtomicBool::new(false),
        });
        let store = BlockStore::with_file(
            file.clone(),
            true,
            &options_with(CompressorType::Noop),
            logger::test_instance(),
        )
        .unwrap();

        store.write(1, block_of(b"payload")).unwrap();

        file.fail_writes.store(true, Ordering::Relaxed);
        assert!(store.flush().is_err());
        file.fail_writes.store(false, Ordering::Relaxed);

        // The failed attempt must not have marked the directory clean.
        store.flush().unwrap();
        assert!(store.index_meta().is_some());
        assert_eq!(store.statistics().index_flushes.get(), 1);
    }
}
