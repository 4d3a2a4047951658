//! Capacity management: sampled approximated-LRU eviction, and the
//! in-place compaction pass that rewrites the blob pool down to its
//! referenced blobs and rebuilds both tables.

use crate::pool;
use crate::segment::Segment;
use crate::tables::{self, FpEntry, KeyEntry, SlotState};
use crate::Result;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

// Sampling rounds before falling back to a full scan.
const SAMPLE_ROUNDS: u32 = 8;

/// Evict the approximately least-recently-used key: sample `samples`
/// slots uniformly, take the oldest occupied one, and tombstone it.
/// Returns false when the table holds nothing to evict.
pub fn evict_one(seg: &mut Segment, samples: u32) -> Result<bool> {
    if seg.item_count() == 0 {
        return Ok(false);
    }
    let slots = seg.layout().key_table_slots;
    let mut victim: Option<(u64, u64)> = None;

    if u64::from(samples) < slots {
        let mut rng = rand::thread_rng();
        for _ in 0..SAMPLE_ROUNDS {
            for _ in 0..samples {
                let slot = rng.gen_range(0..slots);
                let entry = tables::read_key_entry(seg, slot)?;
                if tables::state(&entry.key_hash) == SlotState::Occupied
                    && victim.map(|(_, ns)| entry.last_access_ns < ns).unwrap_or(true)
                {
                    victim = Some((slot, entry.last_access_ns));
                }
            }
            if victim.is_some() {
                break;
            }
        }
        if victim.is_none() {
            // Occupied slots exist but sampling missed them all.
            tracing::warn!("eviction sampling found no occupied slot; scanning");
        }
    }
    if victim.is_none() {
        // Exact scan: the table is smaller than the sample budget, or
        // sampling came up dry.
        for slot in 0..slots {
            let entry = tables::read_key_entry(seg, slot)?;
            if tables::state(&entry.key_hash) == SlotState::Occupied
                && victim.map(|(_, ns)| entry.last_access_ns < ns).unwrap_or(true)
            {
                victim = Some((slot, entry.last_access_ns));
            }
        }
    }

    match victim {
        Some((slot, last_access_ns)) => {
            tracing::debug!(slot, last_access_ns, "evicting key");
            tables::tombstone_key_slot(seg, slot)?;
            let items = seg.item_count();
            seg.set_item_count(items.saturating_sub(1));
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Compact the blob pool in place.
///
/// Referenced blobs are collected from both tables, validated, slid
/// down toward the pool start in address order, and both tables are
/// rebuilt against the relocated addresses. Unreferenced content and
/// any entry pointing at a malformed blob is dropped. Runs under the
/// caller's exclusive lock.
pub fn compact(seg: &mut Segment) -> Result<()> {
    let layout = *seg.layout();

    // Collect live key entries and the fingerprints they reference.
    let mut key_entries: Vec<KeyEntry> = Vec::new();
    let mut referenced_fps: BTreeSet<[u8; 16]> = BTreeSet::new();
    for slot in 0..layout.key_table_slots {
        let entry = tables::read_key_entry(seg, slot)?;
        if tables::state(&entry.key_hash) == SlotState::Occupied {
            referenced_fps.insert(entry.content_fp);
            key_entries.push(entry);
        }
    }

    // Collect referenced fingerprint entries; unreferenced content is
    // dropped here and its blob space reclaimed below.
    let mut fp_entries: Vec<FpEntry> = Vec::new();
    let mut dropped_fps = 0u64;
    for slot in 0..layout.fp_table_slots {
        let entry = tables::read_fp_entry(seg, slot)?;
        if tables::state(&entry.content_fp) == SlotState::Occupied {
            if referenced_fps.contains(&entry.content_fp) {
                fp_entries.push(entry);
            } else {
                dropped_fps += 1;
            }
        }
    }

    // Validate every referenced blob; a malformed blob invalidates the
    // entries referencing it rather than the whole segment.
    let mut spans: BTreeMap<u64, u64> = BTreeMap::new();
    let mut live_fps: BTreeSet<[u8; 16]> = BTreeSet::new();
    fp_entries.retain(|entry| match pool::span(seg, entry.content_addr) {
        Ok(span) => {
            spans.insert(entry.content_addr, span);
            live_fps.insert(entry.content_fp);
            true
        }
        Err(err) => {
            tracing::warn!(addr = entry.content_addr, %err, "dropping invalid content blob");
            false
        }
    });
    let mut dropped_keys = 0u64;
    key_entries.retain(|entry| {
        if !live_fps.contains(&entry.content_fp) {
            dropped_keys += 1;
            return false;
        }
        match pool::span(seg, entry.key_addr) {
            Ok(span) => {
                spans.insert(entry.key_addr, span);
                true
            }
            Err(err) => {
                tracing::warn!(addr = entry.key_addr, %err, "dropping invalid key blob");
                dropped_keys += 1;
                false
            }
        }
    });

    // Slide referenced blobs down in ascending address order. Every
    // destination is at or below its source, so a forward pass with
    // memmove semantics is safe.
    let mut relocations: BTreeMap<u64, u64> = BTreeMap::new();
    let mut next = layout.blob_pool_start;
    for (&old, &span) in &spans {
        relocations.insert(old, next);
        if old != next {
            let (old, next, span) = (old as usize, next as usize, span as usize);
            seg.bytes_mut().copy_within(old..old + span, next);
        }
        next += span;
    }

    // Zero the reclaimed tail.
    let tail = seg.range_mut(next, layout.blob_pool_end() - next)?;
    tail.fill(0);

    // Rebuild both tables from scratch against the new addresses. This
    // also clears accumulated tombstones.
    let zeroed = tables::FpEntry {
        content_fp: tables::EMPTY,
        content_addr: 0,
    };
    for slot in 0..layout.fp_table_slots {
        tables::write_fp_entry(seg, slot, &zeroed)?;
    }
    for slot in 0..layout.key_table_slots {
        tables::write_key_entry(
            seg,
            slot,
            &KeyEntry {
                key_hash: tables::EMPTY,
                key_addr: 0,
                content_fp: tables::EMPTY,
                last_access_ns: 0,
            },
        )?;
    }
    for entry in &fp_entries {
        let relocated = FpEntry {
            content_fp: entry.content_fp,
            content_addr: relocations[&entry.content_addr],
        };
        insert_fp_fresh(seg, &relocated)?;
    }
    for entry in &key_entries {
        let relocated = KeyEntry {
            key_addr: relocations[&entry.key_addr],
            ..*entry
        };
        insert_key_fresh(seg, &relocated)?;
    }

    seg.set_blob_next(next);
    seg.set_blob_used(next - layout.blob_pool_start);
    seg.set_item_count(key_entries.len() as u64);
    seg.bump_segment_version();

    tracing::info!(
        keys = key_entries.len(),
        contents = fp_entries.len(),
        dropped_fps,
        dropped_keys,
        blob_used = next - layout.blob_pool_start,
        "compacted segment"
    );
    Ok(())
}

// Fresh inserts into just-cleared tables: probe to the first empty
// slot. No tombstones exist and occupancy can only have shrunk.
fn insert_key_fresh(seg: &mut Segment, entry: &KeyEntry) -> Result<()> {
    let slots = seg.layout().key_table_slots;
    let mut slot = u64::from_le_bytes(entry.key_hash[..8].try_into().unwrap()) % slots;
    loop {
        let existing = tables::read_key_entry(seg, slot)?;
        if tables::state(&existing.key_hash) == SlotState::Empty {
            return tables::write_key_entry(seg, slot, entry);
        }
        slot = (slot + 1) % slots;
    }
}

fn insert_fp_fresh(seg: &mut Segment, entry: &FpEntry) -> Result<()> {
    let slots = seg.layout().fp_table_slots;
    let mut slot = u64::from_le_bytes(entry.content_fp[..8].try_into().unwrap()) % slots;
    loop {
        let existing = tables::read_fp_entry(seg, slot)?;
        if tables::state(&existing.content_fp) == SlotState::Empty {
            return tables::write_fp_entry(seg, slot, entry);
        }
        slot = (slot + 1) % slots;
    }
}
