// A content-addressable, deduplicating key/value cache over one
// fixed-size shared-memory segment.
//
// The segment holds a header, an append-only blob pool, and two
// open-addressed hash tables: keys map to content fingerprints, and
// fingerprints map to content blobs, so identical values are stored
// once however many keys reference them. Capacity pressure is handled
// by sampled approximated-LRU eviction and in-place compaction.
//
// Every public operation acquires the segment's reentrant lock before
// touching memory and releases it on all paths.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid cache configuration: {0}")]
    Config(String),
    #[error("timed out acquiring the segment lock after {0:?}")]
    LockTimeout(Duration),
    #[error("cache segment is corrupt: {0}")]
    Corruption(String),
    #[error("blob pool cannot fit {needed} more bytes ({remaining} free)")]
    PoolFull { needed: u64, remaining: u64 },
    #[error("key table cannot hold {items} items in {slots} slots without exceeding its load factor")]
    TablesFull { items: u64, slots: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<Ok> = std::result::Result<Ok, Error>;

mod cache;
mod evict;
mod layout;
mod lock;
mod pool;
mod segment;
mod tables;

pub use cache::{Cache, Stats};
pub use layout::Layout;
pub use segment::Segment;

/// Sizing and behavior knobs for a cache segment. The segment is sized
/// once, at creation, from these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of live keys before eviction kicks in.
    pub max_items: u64,
    /// Expected key size, used to size the blob pool.
    pub avg_key_bytes: u64,
    /// Expected value size, used to size the blob pool.
    pub avg_value_bytes: u64,
    /// Upper bound on hash-table occupancy. Exceeding it fails inserts;
    /// tables are never resized.
    pub load_factor_max: f64,
    /// Expected ratio of unique values to total values.
    pub dedup_factor: f64,
    /// Compact when `blob_used / blob_pool_size` exceeds this.
    pub compaction_threshold: f64,
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
    /// Slots sampled per approximated-LRU eviction round.
    pub evict_samples: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_items: 1024,
            avg_key_bytes: 64,
            avg_value_bytes: 1024,
            load_factor_max: 0.65,
            dedup_factor: 1.0,
            compaction_threshold: 0.8,
            lock_timeout: Duration::from_secs(60),
            evict_samples: 10,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        let fail = |message: &str| Err(Error::Config(message.to_string()));
        if self.max_items == 0 {
            return fail("max_items must be positive");
        }
        if self.avg_key_bytes == 0 || self.avg_value_bytes == 0 {
            return fail("average key and value sizes must be positive");
        }
        if !(self.load_factor_max > 0.0 && self.load_factor_max <= 1.0) {
            return fail("load_factor_max must be in (0, 1]");
        }
        if !(self.dedup_factor > 0.0 && self.dedup_factor <= 1.0) {
            return fail("dedup_factor must be in (0, 1]");
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return fail("compaction_threshold must be in (0, 1]");
        }
        if self.evict_samples == 0 {
            return fail("evict_samples must be positive");
        }
        Ok(())
    }
}
