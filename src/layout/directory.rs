use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};
use std::sync::Mutex;

use crate::layout::block::{BlockReader, BlockWriter};
use crate::layout::holes::Hole;
use crate::layout::{Bid, BlockMeta, BLOCK_META_SIZE};

/// What occupies a given on-disk extent: a data block or the persisted
/// directory itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentOwner {
    Block(Bid),
    Index,
}

struct Inner {
    by_bid: BTreeMap<Bid, BlockMeta>,
    // Mirror of the same entries keyed by file position, plus the index
    // block's extent. Kept strictly in sync under the directory lock.
    by_offset: BTreeMap<u64, ExtentOwner>,
}

/// In-memory map from block id to [`BlockMeta`], with a position-keyed
/// mirror used for free-space recovery.
///
/// Methods that vacate an extent hand it back as a [`Hole`]; the caller
/// releases it once the directory lock is no longer held.
pub struct BlockDirectory {
    inner: Mutex<Inner>,
}

impl BlockDirectory {
    pub fn new() -> BlockDirectory {
        BlockDirectory {
            inner: Mutex::new(Inner { by_bid: BTreeMap::new(), by_offset: BTreeMap::new() }),
        }
    }

    /// A copy of the metadata for `bid`.
    pub fn get(&self, bid: Bid) -> Option<BlockMeta> {
        self.inner.lock().unwrap().by_bid.get(&bid).copied()
    }

    /// Inserts or replaces the metadata for `bid`, returning the extent the
    /// previous version occupied.
    pub fn set(&self, bid: Bid, meta: BlockMeta) -> Option<Hole> {
        let mut inner = self.inner.lock().unwrap();

        let old = inner.by_bid.insert(bid, meta);
        let freed = match old {
            Some(old) => {
                inner.by_offset.remove(&old.offset);
                Some(Hole { offset: old.offset, size: old.extent_size() })
            }
            None => None,
        };

        let previous_owner = inner.by_offset.insert(meta.offset, ExtentOwner::Block(bid));
        assert!(
            previous_owner.is_none(),
            "two live extents share offset {}",
            meta.offset
        );

        freed
    }

    /// Removes `bid`, returning the extent it occupied.
    pub fn remove(&self, bid: Bid) -> Option<Hole> {
        let mut inner = self.inner.lock().unwrap();
        let old = inner.by_bid.remove(&bid)?;
        inner.by_offset.remove(&old.offset);
        Some(Hole { offset: old.offset, size: old.extent_size() })
    }

    /// Moves the index block's mirror entry from `old` to `new`.
    pub fn reindex_index_extent(&self, old: Option<u64>, new: Option<u64>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(offset) = old {
            inner.by_offset.remove(&offset);
        }
        if let Some(offset) = new {
            let previous_owner = inner.by_offset.insert(offset, ExtentOwner::Index);
            assert!(
                previous_owner.is_none(),
                "index extent collides with a live extent at offset {}",
                offset
            );
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_bid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().by_bid.is_empty()
    }

    /// All entries ordered by bid.
    pub fn snapshot(&self) -> Vec<(Bid, BlockMeta)> {
        let inner = self.inner.lock().unwrap();
        inner.by_bid.iter().map(|(bid, meta)| (*bid, *meta)).collect()
    }

    /// Serialized size of an index holding `count` entries.
    pub fn serialized_size(count: usize) -> usize {
        4 + count * (8 + BLOCK_META_SIZE)
    }

    /// Current serialized size of the directory.
    pub fn index_size(&self) -> usize {
        Self::serialized_size(self.len())
    }

    /// Serializes the directory: `count(4)` followed by `(bid(8), meta(18))`
    /// records in bid order.
    pub fn write_index(&self, writer: &mut BlockWriter) {
        let inner = self.inner.lock().unwrap();
        writer.write_u32(inner.by_bid.len() as u32);
        for (bid, meta) in inner.by_bid.iter() {
            writer.write_u64(*bid);
            meta.write_to(writer);
        }
    }

    /// Rebuilds the directory and its mirror from a serialized index.
    /// The directory must be empty.
    pub fn read_index(&self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.by_bid.is_empty(), "directory must be empty before recovery");

        let reader = BlockReader::new(data);
        let count = reader.read_u32()?;
        for _ in 0..count {
            let bid = reader.read_u64()?;
            let meta = BlockMeta::read_from(&reader)?;
            if inner.by_bid.insert(bid, meta).is_some() {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("duplicate bid {:#x} in index", bid),
                ));
            }
            if inner.by_offset.insert(meta.offset, ExtentOwner::Block(bid)).is_some() {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("two index entries share offset {}", meta.offset),
                ));
            }
        }
        Ok(count as usize)
    }

    /// Occupied extents as `(offset, size)` pairs ordered by offset,
    /// including the index block when present. `index_meta` must describe
    /// the registered index extent.
    pub fn used_extents(&self, index_meta: Option<&BlockMeta>) -> Vec<(u64, u64)> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_offset
            .iter()
            .map(|(offset, owner)| {
                let size = match owner {
                    ExtentOwner::Block(bid) => inner.by_bid[bid].extent_size(),
                    ExtentOwner::Index => index_meta
                        .expect("index extent registered without metadata")
                        .extent_size(),
                };
                (*offset, size)
            })
            .collect()
    }
}
