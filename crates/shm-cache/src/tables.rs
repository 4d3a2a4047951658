//! The two open-addressed hash tables, probing linearly with tombstone
//! markers. The 128-bit hash is only a hint: every apparent key match
//! is confirmed by byte comparison against the key blob, and content
//! identity is the fingerprint itself.

use crate::layout::{FP_ENTRY_SIZE, KEY_ENTRY_SIZE};
use crate::pool;
use crate::segment::Segment;
use crate::{Error, Result};

/// An empty slot: all zeroes.
pub const EMPTY: [u8; 16] = [0u8; 16];
/// A tombstone: all ones. Preserves probe chains after deletion.
pub const TOMBSTONE: [u8; 16] = [0xFF; 16];

/// A 128-bit xxh3 digest, steered away from the reserved sentinel
/// patterns so stored hashes are never mistaken for slot markers.
pub fn digest(data: &[u8]) -> [u8; 16] {
    let mut d = xxhash_rust::xxh3::xxh3_128(data).to_le_bytes();
    if d == EMPTY {
        d[0] = 0x01;
    } else if d == TOMBSTONE {
        d[0] = 0xFE;
    }
    d
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Tombstone,
    Occupied,
}

pub fn state(marker: &[u8; 16]) -> SlotState {
    if *marker == EMPTY {
        SlotState::Empty
    } else if *marker == TOMBSTONE {
        SlotState::Tombstone
    } else {
        SlotState::Occupied
    }
}

// Probing starts at the hash's low 64 bits modulo the slot count.
fn start_slot(marker: &[u8; 16], slots: u64) -> u64 {
    u64::from_le_bytes(marker[..8].try_into().unwrap()) % slots
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEntry {
    pub key_hash: [u8; 16],
    pub key_addr: u64,
    pub content_fp: [u8; 16],
    pub last_access_ns: u64,
}

pub fn read_key_entry(seg: &Segment, slot: u64) -> Result<KeyEntry> {
    let bytes = seg.range(seg.layout().key_slot_offset(slot), KEY_ENTRY_SIZE)?;
    Ok(KeyEntry {
        key_hash: bytes[0..16].try_into().unwrap(),
        key_addr: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        content_fp: bytes[24..40].try_into().unwrap(),
        last_access_ns: u64::from_le_bytes(bytes[40..48].try_into().unwrap()),
    })
}

pub fn write_key_entry(seg: &mut Segment, slot: u64, entry: &KeyEntry) -> Result<()> {
    let bytes = seg.range_mut(seg.layout().key_slot_offset(slot), KEY_ENTRY_SIZE)?;
    bytes[0..16].copy_from_slice(&entry.key_hash);
    bytes[16..24].copy_from_slice(&entry.key_addr.to_le_bytes());
    bytes[24..40].copy_from_slice(&entry.content_fp);
    bytes[40..48].copy_from_slice(&entry.last_access_ns.to_le_bytes());
    Ok(())
}

/// Convert a key slot into a tombstone, preserving its probe chain.
pub fn tombstone_key_slot(seg: &mut Segment, slot: u64) -> Result<()> {
    write_key_entry(
        seg,
        slot,
        &KeyEntry {
            key_hash: TOMBSTONE,
            key_addr: 0,
            content_fp: EMPTY,
            last_access_ns: 0,
        },
    )
}

/// Find the key's slot, confirming candidate slots by byte comparison.
pub fn key_lookup(seg: &Segment, key: &[u8]) -> Result<Option<(u64, KeyEntry)>> {
    let slots = seg.layout().key_table_slots;
    let hash = digest(key);
    let mut slot = start_slot(&hash, slots);

    for _ in 0..slots {
        let entry = read_key_entry(seg, slot)?;
        match state(&entry.key_hash) {
            SlotState::Empty => return Ok(None),
            SlotState::Tombstone => (),
            SlotState::Occupied if entry.key_hash == hash => {
                let (blob_type, bytes) = pool::read(seg, entry.key_addr)?;
                if blob_type != pool::TYPE_KEY {
                    return Err(Error::Corruption(format!(
                        "key slot {slot} references a non-key blob"
                    )));
                }
                if bytes == key {
                    return Ok(Some((slot, entry)));
                }
            }
            SlotState::Occupied => (),
        }
        slot = (slot + 1) % slots;
    }
    Ok(None)
}

/// Insert or replace a key binding. A replacement rewrites the
/// fingerprint and access time in place; a fresh insert enforces the
/// load factor, appends the key blob, and claims the first reusable
/// slot of the probe chain.
pub fn key_insert(
    seg: &mut Segment,
    key: &[u8],
    content_fp: [u8; 16],
    now_ns: u64,
    load_factor_max: f64,
) -> Result<()> {
    let slots = seg.layout().key_table_slots;
    let hash = digest(key);
    let mut slot = start_slot(&hash, slots);
    let mut insert_at = None;

    for _ in 0..slots {
        let entry = read_key_entry(seg, slot)?;
        match state(&entry.key_hash) {
            SlotState::Empty => {
                if insert_at.is_none() {
                    insert_at = Some(slot);
                }
                break;
            }
            SlotState::Tombstone => {
                if insert_at.is_none() {
                    insert_at = Some(slot);
                }
            }
            SlotState::Occupied if entry.key_hash == hash => {
                let (blob_type, bytes) = pool::read(seg, entry.key_addr)?;
                if blob_type != pool::TYPE_KEY {
                    return Err(Error::Corruption(format!(
                        "key slot {slot} references a non-key blob"
                    )));
                }
                if bytes == key {
                    return write_key_entry(
                        seg,
                        slot,
                        &KeyEntry {
                            content_fp,
                            last_access_ns: now_ns,
                            ..entry
                        },
                    );
                }
            }
            SlotState::Occupied => (),
        }
        slot = (slot + 1) % slots;
    }

    let items = seg.item_count();
    if (items + 1) as f64 / slots as f64 > load_factor_max {
        return Err(Error::TablesFull {
            items: items + 1,
            slots,
        });
    }
    let insert_at = insert_at.ok_or(Error::TablesFull {
        items: items + 1,
        slots,
    })?;

    let key_addr = pool::append(seg, pool::TYPE_KEY, key)?;
    write_key_entry(
        seg,
        insert_at,
        &KeyEntry {
            key_hash: hash,
            key_addr,
            content_fp,
            last_access_ns: now_ns,
        },
    )?;
    seg.set_item_count(items + 1);
    Ok(())
}

/// Refresh a key's access time. Returns whether the key was present.
pub fn key_touch(seg: &mut Segment, key: &[u8], now_ns: u64) -> Result<bool> {
    match key_lookup(seg, key)? {
        Some((slot, entry)) => {
            write_key_entry(
                seg,
                slot,
                &KeyEntry {
                    last_access_ns: now_ns,
                    ..entry
                },
            )?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Tombstone a key binding. Content blobs stay until compaction.
pub fn key_delete(seg: &mut Segment, key: &[u8]) -> Result<bool> {
    match key_lookup(seg, key)? {
        Some((slot, _)) => {
            tombstone_key_slot(seg, slot)?;
            let items = seg.item_count();
            seg.set_item_count(items.saturating_sub(1));
            Ok(true)
        }
        None => Ok(false),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpEntry {
    pub content_fp: [u8; 16],
    pub content_addr: u64,
}

pub fn read_fp_entry(seg: &Segment, slot: u64) -> Result<FpEntry> {
    let bytes = seg.range(seg.layout().fp_slot_offset(slot), FP_ENTRY_SIZE)?;
    Ok(FpEntry {
        content_fp: bytes[0..16].try_into().unwrap(),
        content_addr: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
    })
}

pub fn write_fp_entry(seg: &mut Segment, slot: u64, entry: &FpEntry) -> Result<()> {
    let bytes = seg.range_mut(seg.layout().fp_slot_offset(slot), FP_ENTRY_SIZE)?;
    bytes[0..16].copy_from_slice(&entry.content_fp);
    bytes[16..24].copy_from_slice(&entry.content_addr.to_le_bytes());
    Ok(())
}

pub fn fp_lookup(seg: &Segment, content_fp: &[u8; 16]) -> Result<Option<(u64, u64)>> {
    let slots = seg.layout().fp_table_slots;
    let mut slot = start_slot(content_fp, slots);

    for _ in 0..slots {
        let entry = read_fp_entry(seg, slot)?;
        match state(&entry.content_fp) {
            SlotState::Empty => return Ok(None),
            SlotState::Tombstone => (),
            SlotState::Occupied if entry.content_fp == *content_fp => {
                return Ok(Some((slot, entry.content_addr)))
            }
            SlotState::Occupied => (),
        }
        slot = (slot + 1) % slots;
    }
    Ok(None)
}

/// Deduplicating content store: return the existing blob address for
/// this fingerprint, or append the bytes and index them.
pub fn fp_get_or_put(seg: &mut Segment, content_fp: [u8; 16], data: &[u8]) -> Result<u64> {
    if let Some((_, addr)) = fp_lookup(seg, &content_fp)? {
        return Ok(addr);
    }

    let slots = seg.layout().fp_table_slots;
    let mut slot = start_slot(&content_fp, slots);
    let mut insert_at = None;
    for _ in 0..slots {
        let entry = read_fp_entry(seg, slot)?;
        match state(&entry.content_fp) {
            SlotState::Empty | SlotState::Tombstone => {
                insert_at = Some(slot);
                break;
            }
            SlotState::Occupied => (),
        }
        slot = (slot + 1) % slots;
    }
    let insert_at = insert_at.ok_or(Error::TablesFull {
        items: slots,
        slots,
    })?;

    let content_addr = pool::append(seg, pool::TYPE_CONTENT, data)?;
    write_fp_entry(
        seg,
        insert_at,
        &FpEntry {
            content_fp,
            content_addr,
        },
    )?;
    Ok(content_addr)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::Layout;
    use crate::Config;

    fn segment(max_items: u64) -> Segment {
        let cfg = Config {
            max_items,
            avg_key_bytes: 32,
            avg_value_bytes: 64,
            ..Config::default()
        };
        Segment::create_anonymous(Layout::for_config(&cfg).unwrap()).unwrap()
    }

    #[test]
    fn test_digest_avoids_sentinels() {
        let d = digest(b"some key");
        assert_ne!(d, EMPTY);
        assert_ne!(d, TOMBSTONE);
        assert_eq!(d, digest(b"some key"));
        assert_ne!(d, digest(b"other key"));
    }

    #[test]
    fn test_insert_lookup_replace() {
        let mut seg = segment(16);
        let fp_a = digest(b"value a");
        let fp_b = digest(b"value b");

        key_insert(&mut seg, b"k1", fp_a, 10, 0.65).unwrap();
        assert_eq!(seg.item_count(), 1);
        let (_, entry) = key_lookup(&seg, b"k1").unwrap().unwrap();
        assert_eq!(entry.content_fp, fp_a);
        assert_eq!(entry.last_access_ns, 10);

        // Replacement updates in place; item_count is unchanged.
        key_insert(&mut seg, b"k1", fp_b, 20, 0.65).unwrap();
        assert_eq!(seg.item_count(), 1);
        let (_, entry) = key_lookup(&seg, b"k1").unwrap().unwrap();
        assert_eq!(entry.content_fp, fp_b);
        assert_eq!(entry.last_access_ns, 20);

        assert!(key_lookup(&seg, b"missing").unwrap().is_none());
    }

    #[test]
    fn test_touch_and_delete() {
        let mut seg = segment(16);
        key_insert(&mut seg, b"k", digest(b"v"), 5, 0.65).unwrap();

        assert!(key_touch(&mut seg, b"k", 99).unwrap());
        let (_, entry) = key_lookup(&seg, b"k").unwrap().unwrap();
        assert_eq!(entry.last_access_ns, 99);

        assert!(key_delete(&mut seg, b"k").unwrap());
        assert_eq!(seg.item_count(), 0);
        assert!(key_lookup(&seg, b"k").unwrap().is_none());
        assert!(!key_delete(&mut seg, b"k").unwrap());
    }

    #[test]
    fn test_tombstones_preserve_probe_chains() {
        let mut seg = segment(64);
        // Insert enough keys that some probe chains collide, delete
        // every other one, and confirm the survivors still resolve.
        let keys: Vec<String> = (0..32).map(|i| format!("key-{i}")).collect();
        for key in &keys {
            key_insert(&mut seg, key.as_bytes(), digest(key.as_bytes()), 1, 0.65).unwrap();
        }
        for key in keys.iter().step_by(2) {
            assert!(key_delete(&mut seg, key.as_bytes()).unwrap());
        }
        for (i, key) in keys.iter().enumerate() {
            let found = key_lookup(&seg, key.as_bytes()).unwrap();
            assert_eq!(found.is_some(), i % 2 == 1, "key {key}");
        }
        // Deleted keys can be re-inserted over their tombstones.
        for key in keys.iter().step_by(2) {
            key_insert(&mut seg, key.as_bytes(), digest(b"new"), 2, 0.65).unwrap();
        }
        for key in &keys {
            assert!(key_lookup(&seg, key.as_bytes()).unwrap().is_some());
        }
    }

    #[test]
    fn test_load_factor_is_enforced() {
        let mut seg = segment(4);
        let slots = seg.layout().key_table_slots;
        let limit = (slots as f64 * 0.65).floor() as u64;
        let mut failed = false;
        for i in 0..slots {
            let key = format!("key-{i}");
            match key_insert(&mut seg, key.as_bytes(), digest(b"v"), 1, 0.65) {
                Ok(()) => assert!(seg.item_count() <= limit),
                Err(Error::TablesFull { .. }) => {
                    failed = true;
                    break;
                }
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert!(failed, "insertion should hit the load factor bound");
    }

    #[test]
    fn test_fingerprint_dedup() {
        let mut seg = segment(16);
        let fp = digest(b"shared value");

        let a = fp_get_or_put(&mut seg, fp, b"shared value").unwrap();
        let used = seg.blob_used();
        let b = fp_get_or_put(&mut seg, fp, b"shared value").unwrap();

        assert_eq!(a, b);
        assert_eq!(seg.blob_used(), used, "no second blob is written");
        assert_eq!(fp_lookup(&seg, &fp).unwrap().unwrap().1, a);
    }
}
