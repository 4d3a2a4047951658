//! The append-only blob pool. Each blob is `[type:1][len:4le][data]`
//! padded to 8-byte alignment. Blobs are immutable until compaction
//! relocates or drops them.

use crate::layout::{align8, BLOB_HEADER_SIZE};
use crate::segment::Segment;
use crate::{Error, Result};

/// Blob holding key bytes.
pub const TYPE_KEY: u8 = 1;
/// Blob holding content bytes.
pub const TYPE_CONTENT: u8 = 2;

/// Append a blob, returning its absolute address.
pub fn append(seg: &mut Segment, blob_type: u8, data: &[u8]) -> Result<u64> {
    debug_assert!(blob_type == TYPE_KEY || blob_type == TYPE_CONTENT);

    let end = seg.layout().blob_pool_end();
    let addr = seg.blob_next();
    let need = align8(BLOB_HEADER_SIZE + data.len() as u64);
    if addr + need > end {
        return Err(Error::PoolFull {
            needed: need,
            remaining: end - addr,
        });
    }

    let region = seg.range_mut(addr, need)?;
    region[0] = blob_type;
    region[1..5].copy_from_slice(&(data.len() as u32).to_le_bytes());
    region[5..5 + data.len()].copy_from_slice(data);
    // Padding stays zero for the benefit of hexdump-style debugging,
    // and compaction moves it verbatim.
    for pad in &mut region[5 + data.len()..] {
        *pad = 0;
    }

    seg.set_blob_next(addr + need);
    let used = seg.blob_used() + need;
    seg.set_blob_used(used);
    Ok(addr)
}

/// Read the blob at `addr`, returning its type tag and data view.
/// Every bound is checked; a bad address is corruption, not a panic.
pub fn read(seg: &Segment, addr: u64) -> Result<(u8, &[u8])> {
    let (blob_type, len) = header(seg, addr)?;
    let data = seg.range(addr + BLOB_HEADER_SIZE, len)?;
    Ok((blob_type, data))
}

/// The total aligned span of the blob at `addr`, as used by compaction.
pub fn span(seg: &Segment, addr: u64) -> Result<u64> {
    let (_, len) = header(seg, addr)?;
    Ok(align8(BLOB_HEADER_SIZE + len))
}

fn header(seg: &Segment, addr: u64) -> Result<(u8, u64)> {
    let layout = seg.layout();
    if addr < layout.blob_pool_start || addr % 8 != 0 {
        return Err(Error::Corruption(format!("blob address {addr} is invalid")));
    }
    let end = layout.blob_pool_end();
    if addr + BLOB_HEADER_SIZE > end {
        return Err(Error::Corruption(format!(
            "blob header at {addr} escapes the pool"
        )));
    }
    let head = seg.range(addr, BLOB_HEADER_SIZE)?;
    let blob_type = head[0];
    if blob_type != TYPE_KEY && blob_type != TYPE_CONTENT {
        return Err(Error::Corruption(format!(
            "blob at {addr} has unknown type {blob_type}"
        )));
    }
    let len = u32::from_le_bytes(head[1..5].try_into().unwrap()) as u64;
    if addr + BLOB_HEADER_SIZE + len > end {
        return Err(Error::Corruption(format!(
            "blob at {addr} of length {len} escapes the pool"
        )));
    }
    Ok((blob_type, len))
}
