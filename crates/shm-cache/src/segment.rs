use crate::layout::{self, hdr, Layout};
use crate::{Error, Result};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

/// Segment is one mapped shared-memory region holding the cache.
///
/// Unsafety is confined to the mmap boundary: everything above works
/// through bounds-checked byte-slice views of the mapping.
pub struct Segment {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl Segment {
    /// Map a fresh anonymous segment. Anonymous segments are shared
    /// with forked children and are what tests use.
    pub fn create_anonymous(layout: Layout) -> Result<Segment> {
        let len = layout.total_size as usize;
        // Safety: requesting a fresh zero-filled mapping from the OS.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        let mut segment = Segment {
            ptr: NonNull::new(ptr as *mut u8).expect("mmap returned a non-null mapping"),
            len,
            layout,
        };
        segment.format();
        Ok(segment)
    }

    /// Create and map a named POSIX shared-memory segment. Fails if the
    /// name already exists.
    pub fn create_named(name: &str, layout: Layout) -> Result<Segment> {
        let len = layout.total_size as usize;
        let cname = shm_name(name)?;
        // Safety: plain POSIX shm calls; the fd is closed once mapped.
        let segment = unsafe {
            let fd = libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            if libc::ftruncate(fd, len as libc::off_t) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
                return Err(err.into());
            }
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if ptr == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                libc::shm_unlink(cname.as_ptr());
                return Err(err.into());
            }
            Segment {
                ptr: NonNull::new(ptr as *mut u8).expect("mmap returned a non-null mapping"),
                len,
                layout,
            }
        };
        let mut segment = segment;
        segment.format();
        tracing::info!(name, size = len, "created cache segment");
        Ok(segment)
    }

    /// Map an existing named segment and validate its header.
    pub fn open_named(name: &str) -> Result<Segment> {
        let cname = shm_name(name)?;
        // Safety: as in create_named; the length comes from fstat.
        let (ptr, len) = unsafe {
            let fd = libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }
            let len = stat.st_size as usize;
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error().into());
            }
            (NonNull::new(ptr as *mut u8).expect("mmap returned a non-null mapping"), len)
        };

        // A placeholder layout until the header is decoded; Drop
        // unmaps correctly either way.
        let mut segment = Segment {
            ptr,
            len,
            layout: Layout {
                total_size: len as u64,
                blob_pool_start: layout::HEADER_SIZE,
                blob_pool_size: 0,
                key_table_start: layout::HEADER_SIZE,
                key_table_slots: 0,
                fp_table_start: layout::HEADER_SIZE,
                fp_table_slots: 0,
                max_items: 0,
            },
        };
        segment.layout = segment.decode_header()?;
        tracing::info!(name, size = len, "attached cache segment");
        Ok(segment)
    }

    /// Remove a named segment. Existing mappings stay valid until
    /// unmapped.
    pub fn unlink(name: &str) -> Result<()> {
        let cname = shm_name(name)?;
        // Safety: shm_unlink only removes the name.
        if unsafe { libc::shm_unlink(cname.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        // Safety: the mapping is valid for self.len bytes for the
        // lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and &mut self guarantees exclusivity
        // within this process; the segment lock guards across callers.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// A bounds-checked view of `len` bytes at `offset`.
    pub fn range(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len as u64)
            .ok_or_else(|| {
                Error::Corruption(format!("range {offset}+{len} escapes the segment"))
            })?;
        Ok(&self.bytes()[offset as usize..end as usize])
    }

    pub fn range_mut(&mut self, offset: u64, len: u64) -> Result<&mut [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len as u64)
            .ok_or_else(|| {
                Error::Corruption(format!("range {offset}+{len} escapes the segment"))
            })?;
        Ok(&mut self.bytes_mut()[offset as usize..end as usize])
    }

    // Header accessors. Offsets are compile-time constants within the
    // 512-byte header, which the mapping always covers.

    pub fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.bytes()[offset..offset + 4].try_into().unwrap())
    }

    pub fn set_u32(&mut self, offset: usize, value: u32) {
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn get_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.bytes()[offset..offset + 8].try_into().unwrap())
    }

    pub fn set_u64(&mut self, offset: usize, value: u64) {
        self.bytes_mut()[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn blob_next(&self) -> u64 {
        self.get_u64(hdr::BLOB_NEXT)
    }

    pub fn set_blob_next(&mut self, value: u64) {
        self.set_u64(hdr::BLOB_NEXT, value);
    }

    pub fn blob_used(&self) -> u64 {
        self.get_u64(hdr::BLOB_USED)
    }

    pub fn set_blob_used(&mut self, value: u64) {
        self.set_u64(hdr::BLOB_USED, value);
    }

    pub fn item_count(&self) -> u64 {
        self.get_u64(hdr::ITEM_COUNT)
    }

    pub fn set_item_count(&mut self, value: u64) {
        self.set_u64(hdr::ITEM_COUNT, value);
    }

    pub fn segment_version(&self) -> u32 {
        self.get_u32(hdr::SEGMENT_VERSION)
    }

    pub fn bump_segment_version(&mut self) {
        let next = self.segment_version().wrapping_add(1);
        self.set_u32(hdr::SEGMENT_VERSION, next);
    }

    // Write the header of a freshly-created, zero-filled segment.
    fn format(&mut self) {
        let layout = self.layout;
        self.set_u64(hdr::MAGIC, layout::MAGIC);
        self.set_u32(hdr::VERSION, layout::VERSION);
        self.set_u32(hdr::SEGMENT_VERSION, 0);
        self.set_u64(hdr::TOTAL_SIZE, layout.total_size);
        self.set_u64(hdr::BLOB_POOL_START, layout.blob_pool_start);
        self.set_u64(hdr::BLOB_POOL_SIZE, layout.blob_pool_size);
        self.set_u64(hdr::BLOB_USED, 0);
        self.set_u64(hdr::BLOB_NEXT, layout.blob_pool_start);
        self.set_u64(hdr::KEY_TABLE_START, layout.key_table_start);
        self.set_u64(hdr::KEY_TABLE_SLOTS, layout.key_table_slots);
        self.set_u64(hdr::FP_TABLE_START, layout.fp_table_start);
        self.set_u64(hdr::FP_TABLE_SLOTS, layout.fp_table_slots);
        self.set_u64(hdr::MAX_ITEMS, layout.max_items);
        self.set_u64(hdr::ITEM_COUNT, 0);
    }

    // Decode and validate the header of an attached segment.
    fn decode_header(&self) -> Result<Layout> {
        if self.len < layout::HEADER_SIZE as usize {
            return Err(Error::Corruption(format!(
                "segment is {} bytes, smaller than the header",
                self.len
            )));
        }
        if self.get_u64(hdr::MAGIC) != layout::MAGIC {
            return Err(Error::Corruption("bad magic number".to_string()));
        }
        let version = self.get_u32(hdr::VERSION);
        if version != layout::VERSION {
            return Err(Error::Corruption(format!(
                "segment version {version} is not {}",
                layout::VERSION
            )));
        }
        let decoded = Layout {
            total_size: self.get_u64(hdr::TOTAL_SIZE),
            blob_pool_start: self.get_u64(hdr::BLOB_POOL_START),
            blob_pool_size: self.get_u64(hdr::BLOB_POOL_SIZE),
            key_table_start: self.get_u64(hdr::KEY_TABLE_START),
            key_table_slots: self.get_u64(hdr::KEY_TABLE_SLOTS),
            fp_table_start: self.get_u64(hdr::FP_TABLE_START),
            fp_table_slots: self.get_u64(hdr::FP_TABLE_SLOTS),
            max_items: self.get_u64(hdr::MAX_ITEMS),
        };
        decoded.validate(self.len as u64)?;

        let (next, used) = (self.get_u64(hdr::BLOB_NEXT), self.get_u64(hdr::BLOB_USED));
        if next < decoded.blob_pool_start || next > decoded.blob_pool_end() {
            return Err(Error::Corruption(format!("blob_next {next} is out of range")));
        }
        if used > decoded.blob_pool_size {
            return Err(Error::Corruption(format!("blob_used {used} is out of range")));
        }
        Ok(decoded)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // Safety: the mapping was created by mmap with this length.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

fn shm_name(name: &str) -> Result<CString> {
    let normalized = format!("/{}", name.trim_start_matches('/'));
    CString::new(normalized)
        .map_err(|_| Error::Config("segment name contains a NUL byte".to_string()))
}
