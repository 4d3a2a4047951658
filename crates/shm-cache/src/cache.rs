use crate::evict;
use crate::layout::Layout;
use crate::lock::SegmentLock;
use crate::pool;
use crate::segment::Segment;
use crate::tables::{self, KeyEntry, SlotState};
use crate::{Config, Error, Result};
use serde::Serialize;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Cache is the public face of a shared-memory segment: a deduplicating
/// key/value store with approximated-LRU eviction and compaction.
///
/// Keys and values are opaque bytes. Every method acquires the
/// segment's reentrant lock before touching memory, so a Cache may be
/// shared freely across threads.
pub struct Cache {
    // Careful! The segment is only ever accessed while `lock` is held;
    // see seg() for the single place that bends the borrow rules.
    segment: UnsafeCell<Segment>,
    lock: SegmentLock,
    cfg: Config,
}

// Safety: all access to `segment` is serialized by `lock`, which every
// public method acquires before calling seg(). Nothing hands out
// references that outlive the guard.
unsafe impl Send for Cache {}
unsafe impl Sync for Cache {}

/// A point-in-time summary of segment occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub item_count: u64,
    pub blob_used: u64,
    pub blob_pool_size: u64,
    pub table_load: f64,
    pub tombstones: u64,
    pub fp_count: u64,
    pub segment_version: u32,
}

impl Cache {
    /// An anonymous segment: private to this process and its forks.
    pub fn new(cfg: Config) -> Result<Cache> {
        let layout = Layout::for_config(&cfg)?;
        Ok(Cache {
            segment: UnsafeCell::new(Segment::create_anonymous(layout)?),
            lock: SegmentLock::new(),
            cfg,
        })
    }

    /// Create a named POSIX shared-memory segment.
    pub fn create_named(name: &str, cfg: Config) -> Result<Cache> {
        let layout = Layout::for_config(&cfg)?;
        Ok(Cache {
            segment: UnsafeCell::new(Segment::create_named(name, layout)?),
            lock: SegmentLock::new(),
            cfg,
        })
    }

    /// Attach to an existing named segment. Sizing comes from the
    /// segment's own header; `cfg` supplies the behavior knobs.
    pub fn open_named(name: &str, cfg: Config) -> Result<Cache> {
        cfg.validate()?;
        Ok(Cache {
            segment: UnsafeCell::new(Segment::open_named(name)?),
            lock: SegmentLock::new(),
            cfg,
        })
    }

    /// Remove a named segment's name. Attached processes keep their
    /// mappings until they detach.
    pub fn unlink(name: &str) -> Result<()> {
        Segment::unlink(name)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    // Safety: callers hold the segment lock for the lifetime of the
    // returned reference. This is the only access path to the segment.
    #[allow(clippy::mut_from_ref)]
    fn seg(&self) -> &mut Segment {
        unsafe { &mut *self.segment.get() }
    }

    /// Look up a key, returning a copy of its content bytes and
    /// refreshing its recency.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.acquire(self.cfg.lock_timeout)?;
        let seg = self.seg();

        let Some((slot, entry)) = tables::key_lookup(seg, key)? else {
            return Ok(None);
        };
        let Some((_, content_addr)) = tables::fp_lookup(seg, &entry.content_fp)? else {
            return Err(Error::Corruption(
                "key entry references a missing fingerprint entry".to_string(),
            ));
        };
        let value = {
            let (blob_type, bytes) = pool::read(seg, content_addr)?;
            if blob_type != pool::TYPE_CONTENT {
                return Err(Error::Corruption(format!(
                    "fingerprint entry references a non-content blob at {content_addr}"
                )));
            }
            bytes.to_vec()
        };
        tables::write_key_entry(
            seg,
            slot,
            &KeyEntry {
                last_access_ns: now_ns(),
                ..entry
            },
        )?;
        Ok(Some(value))
    }

    /// Insert or replace a key. Identical values share one content
    /// blob; capacity pressure evicts and, on pool exhaustion,
    /// compacts before retrying.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _guard = self.lock.acquire(self.cfg.lock_timeout)?;
        let seg = self.seg();

        let fp = tables::digest(value);
        let exists = tables::key_lookup(seg, key)?.is_some();
        if !exists && seg.item_count() >= seg.layout().max_items {
            evict::evict_one(seg, self.cfg.evict_samples)?;
        }

        let mut compacted = false;
        loop {
            match put_once(seg, key, value, fp, self.cfg.load_factor_max) {
                Ok(()) => break,
                Err(err @ Error::PoolFull { .. }) => {
                    // Reclaim space and retry; each round either frees
                    // bytes or shrinks the table, so this terminates.
                    if !compacted {
                        evict::compact(seg)?;
                        compacted = true;
                    } else if seg.item_count() > 0 {
                        evict::evict_one(seg, self.cfg.evict_samples)?;
                        evict::compact(seg)?;
                    } else {
                        return Err(err);
                    }
                }
                Err(other) => return Err(other),
            }
        }

        let layout = *seg.layout();
        let fill = seg.blob_used() as f64 / layout.blob_pool_size as f64;
        if fill > self.cfg.compaction_threshold {
            tracing::debug!(fill, "pool past compaction threshold");
            evict::compact(seg)?;
        }
        Ok(())
    }

    /// Refresh a key's recency without copying its value.
    pub fn touch(&self, key: &[u8]) -> Result<bool> {
        let _guard = self.lock.acquire(self.cfg.lock_timeout)?;
        tables::key_touch(self.seg(), key, now_ns())
    }

    /// Tombstone a key. Its content blob survives until compaction
    /// finds it unreferenced.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let _guard = self.lock.acquire(self.cfg.lock_timeout)?;
        tables::key_delete(self.seg(), key)
    }

    /// Defragment the blob pool, dropping unreferenced content.
    pub fn compact(&self) -> Result<()> {
        let _guard = self.lock.acquire(self.cfg.lock_timeout)?;
        evict::compact(self.seg())
    }

    pub fn stats(&self) -> Result<Stats> {
        let _guard = self.lock.acquire(self.cfg.lock_timeout)?;
        let seg = self.seg();
        let layout = *seg.layout();

        let mut tombstones = 0;
        for slot in 0..layout.key_table_slots {
            let entry = tables::read_key_entry(seg, slot)?;
            if tables::state(&entry.key_hash) == SlotState::Tombstone {
                tombstones += 1;
            }
        }
        let mut fp_count = 0;
        for slot in 0..layout.fp_table_slots {
            let entry = tables::read_fp_entry(seg, slot)?;
            if tables::state(&entry.content_fp) == SlotState::Occupied {
                fp_count += 1;
            }
        }
        Ok(Stats {
            item_count: seg.item_count(),
            blob_used: seg.blob_used(),
            blob_pool_size: layout.blob_pool_size,
            table_load: seg.item_count() as f64 / layout.key_table_slots as f64,
            tombstones,
            fp_count,
            segment_version: seg.segment_version(),
        })
    }
}

fn put_once(
    seg: &mut Segment,
    key: &[u8],
    value: &[u8],
    fp: [u8; 16],
    load_factor_max: f64,
) -> Result<()> {
    tables::fp_get_or_put(seg, fp, value)?;
    tables::key_insert(seg, key, fp, now_ns(), load_factor_max)
}

// Wall-clock nanoseconds, forced strictly monotonic within this
// process so same-instant accesses still order.
fn now_ns() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = wall.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => prev = observed,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn small() -> Config {
        Config {
            max_items: 8,
            avg_key_bytes: 16,
            avg_value_bytes: 64,
            ..Config::default()
        }
    }

    #[test]
    fn test_round_trip() {
        let cache = Cache::new(small()).unwrap();
        assert_eq!(cache.get(b"q").unwrap(), None);

        cache.put(b"q", b"a compiled plan").unwrap();
        assert_eq!(cache.get(b"q").unwrap().as_deref(), Some(b"a compiled plan".as_ref()));

        cache.put(b"q", b"a newer plan").unwrap();
        assert_eq!(cache.get(b"q").unwrap().as_deref(), Some(b"a newer plan".as_ref()));
        assert_eq!(cache.stats().unwrap().item_count, 1);
    }

    #[test]
    fn test_put_is_idempotent() {
        let cache = Cache::new(small()).unwrap();
        cache.put(b"k", b"v").unwrap();
        let before = cache.stats().unwrap();
        cache.put(b"k", b"v").unwrap();
        let after = cache.stats().unwrap();
        assert_eq!(before.item_count, after.item_count);
        assert_eq!(before.blob_used, after.blob_used);
    }

    #[test]
    fn test_delete_then_reinsert() {
        let cache = Cache::new(small()).unwrap();
        cache.put(b"k", b"old").unwrap();
        assert!(cache.delete(b"k").unwrap());
        assert_eq!(cache.get(b"k").unwrap(), None);
        assert!(!cache.delete(b"k").unwrap());

        cache.put(b"k", b"new").unwrap();
        assert_eq!(cache.get(b"k").unwrap().as_deref(), Some(b"new".as_ref()));
    }

    #[test]
    fn test_stats_serialize() {
        let cache = Cache::new(small()).unwrap();
        cache.put(b"k", b"v").unwrap();
        let json = serde_json::to_value(cache.stats().unwrap()).unwrap();
        assert_eq!(json["item_count"], 1);
        assert_eq!(json["fp_count"], 1);
        assert_eq!(json["segment_version"], 0);
    }

    #[test]
    fn test_corruption_surfaces_on_get() {
        let cache = Cache::new(small()).unwrap();
        cache.put(b"k", b"v").unwrap();
        // Scribble over the blob pool's type tags.
        {
            let seg = cache.seg();
            let layout = *seg.layout();
            let region = seg
                .range_mut(layout.blob_pool_start, layout.blob_pool_size)
                .unwrap();
            region.fill(0x7F);
        }
        assert!(matches!(cache.get(b"k"), Err(Error::Corruption(_))));
    }
}
