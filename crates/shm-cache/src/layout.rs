//! On-segment layout: header field offsets, entry strides, and region
//! sizing. All region boundaries are 8-byte aligned and every offset
//! the header records is absolute within the segment.

use crate::{Config, Error, Result};

/// "SCCACHE0", big-endian.
pub const MAGIC: u64 = 0x5343434143484530;
pub const VERSION: u32 = 1;

pub const HEADER_SIZE: u64 = 512;
/// `[key_hash:16][key_addr:8][content_fp:16][last_access_ns:8]`.
pub const KEY_ENTRY_SIZE: u64 = 48;
/// `[content_fp:16][content_addr:8]`.
pub const FP_ENTRY_SIZE: u64 = 24;
/// `[type:1][length:4]`, ahead of each blob's data.
pub const BLOB_HEADER_SIZE: u64 = 5;

/// Header field offsets.
pub mod hdr {
    pub const MAGIC: usize = 0x00;
    pub const VERSION: usize = 0x08;
    pub const SEGMENT_VERSION: usize = 0x0C;
    pub const TOTAL_SIZE: usize = 0x10;
    pub const BLOB_POOL_START: usize = 0x18;
    pub const BLOB_POOL_SIZE: usize = 0x20;
    pub const BLOB_USED: usize = 0x28;
    pub const BLOB_NEXT: usize = 0x30;
    pub const KEY_TABLE_START: usize = 0x38;
    pub const KEY_TABLE_SLOTS: usize = 0x40;
    pub const FP_TABLE_START: usize = 0x48;
    pub const FP_TABLE_SLOTS: usize = 0x50;
    pub const MAX_ITEMS: usize = 0x58;
    pub const ITEM_COUNT: usize = 0x60;
}

pub fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// The resolved region geometry of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub total_size: u64,
    pub blob_pool_start: u64,
    pub blob_pool_size: u64,
    pub key_table_start: u64,
    pub key_table_slots: u64,
    pub fp_table_start: u64,
    pub fp_table_slots: u64,
    pub max_items: u64,
}

impl Layout {
    /// Size regions for a configuration.
    pub fn for_config(cfg: &Config) -> Result<Layout> {
        cfg.validate()?;

        let key_table_slots = (cfg.max_items as f64 / cfg.load_factor_max).ceil() as u64;
        // Worst case: no deduplication at all.
        let fp_table_slots = key_table_slots;

        let payload = cfg.max_items * cfg.avg_key_bytes
            + (cfg.max_items as f64 * cfg.avg_value_bytes as f64 * cfg.dedup_factor) as u64;
        // 1.5x covers per-blob headers, padding, and estimate error.
        let blob_pool_size = align8((1.5 * payload as f64).ceil() as u64);

        let blob_pool_start = HEADER_SIZE;
        let key_table_start = align8(blob_pool_start + blob_pool_size);
        let fp_table_start = align8(key_table_start + key_table_slots * KEY_ENTRY_SIZE);
        let total_size = align8(fp_table_start + fp_table_slots * FP_ENTRY_SIZE);

        tracing::debug!(
            total_size,
            blob_pool_size,
            key_table_slots,
            "sized cache segment"
        );
        Ok(Layout {
            total_size,
            blob_pool_start,
            blob_pool_size,
            key_table_start,
            key_table_slots,
            fp_table_start,
            fp_table_slots,
            max_items: cfg.max_items,
        })
    }

    pub fn blob_pool_end(&self) -> u64 {
        self.blob_pool_start + self.blob_pool_size
    }

    pub fn key_slot_offset(&self, slot: u64) -> u64 {
        self.key_table_start + slot * KEY_ENTRY_SIZE
    }

    pub fn fp_slot_offset(&self, slot: u64) -> u64 {
        self.fp_table_start + slot * FP_ENTRY_SIZE
    }

    /// Check the internal consistency of a layout decoded from a
    /// header, against the mapped length.
    pub fn validate(&self, mapped_len: u64) -> Result<()> {
        let corrupt = |message: String| Err(Error::Corruption(message));
        if self.total_size != mapped_len {
            return corrupt(format!(
                "header claims {} bytes but the mapping is {} bytes",
                self.total_size, mapped_len
            ));
        }
        if self.blob_pool_start < HEADER_SIZE {
            return corrupt("blob pool overlaps the header".to_string());
        }
        let regions = [
            (self.blob_pool_start, self.blob_pool_size),
            (self.key_table_start, self.key_table_slots * KEY_ENTRY_SIZE),
            (self.fp_table_start, self.fp_table_slots * FP_ENTRY_SIZE),
        ];
        let mut cursor = HEADER_SIZE;
        for (start, size) in regions {
            if start % 8 != 0 || start < cursor {
                return corrupt(format!("region at {start} is misaligned or overlapping"));
            }
            let end = start
                .checked_add(size)
                .ok_or_else(|| Error::Corruption("region size overflows".to_string()))?;
            if end > self.total_size {
                return corrupt(format!("region at {start} extends past the segment"));
            }
            cursor = end;
        }
        if self.key_table_slots == 0 || self.fp_table_slots == 0 {
            return corrupt("hash tables have no slots".to_string());
        }
        Ok(())
    }
}
