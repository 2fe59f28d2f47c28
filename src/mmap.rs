//! The chunked memory-mapped accessor (C6): an alternative byte source that
//! windows a single active view over the file, sized to bound virtual
//! address space usage on very large tables.
//!
//! Mapping a 10 GiB file as one view exhausts 32-bit VA spaces and wastes
//! commit even on 64-bit systems; 256 MiB windows keep sequential scans
//! local while bounding resource use.

use crate::error::DbfResult;

/// Default window size: large enough to amortize the cost of remapping
/// during a sequential scan, small enough to bound address space usage.
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024 * 1024;

#[cfg(feature = "mmap")]
mod imp {
    use std::fs::File;
    use std::sync::Mutex;

    use memmap2::{Mmap, MmapOptions};

    use crate::error::{DbfResult, Error};

    use super::DEFAULT_CHUNK_SIZE;

    struct ActiveView {
        start: u64,
        mmap: Mmap,
    }

    /// A bounded window over a mapped file. Only one view is ever live; a
    /// read outside the current window disposes it and maps a new one
    /// aligned to `chunk_size` boundaries. All access is serialized under an
    /// internal lock, so reads are not parallel.
    pub struct ChunkedMappedAccessor {
        file: File,
        len: u64,
        chunk_size: u64,
        active: Mutex<Option<ActiveView>>,
    }

    impl ChunkedMappedAccessor {
        pub fn new(file: File, chunk_size: Option<u64>) -> DbfResult<Self> {
            let len = file.metadata()?.len();
            let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).min(len.max(1));
            Ok(ChunkedMappedAccessor {
                file,
                len,
                chunk_size,
                active: Mutex::new(None),
            })
        }

        pub fn len(&self) -> u64 {
            self.len
        }

        /// Read `dst.len()` bytes starting at `offset`. Rejects any request
        /// that would run past the end of the file.
        pub fn read_at(&self, offset: u64, dst: &mut [u8]) -> DbfResult<()> {
            let read_len = dst.len() as u64;
            let end = offset
                .checked_add(read_len)
                .ok_or_else(|| Error::InvalidHeader {
                    reason: "read_at offset overflow".to_string(),
                })?;
            if offset >= self.len && read_len > 0 {
                return Err(Error::InvalidHeader {
                    reason: format!("read_at offset {offset} is past end of file (len {})", self.len),
                });
            }
            if end > self.len {
                return Err(Error::InvalidHeader {
                    reason: format!(
                        "read_at range {offset}..{end} runs past end of file (len {})",
                        self.len
                    ),
                });
            }
            if read_len == 0 {
                return Ok(());
            }

            let mut active = self.active.lock().unwrap();
            let needs_new_view = match &*active {
                Some(view) => offset < view.start || end > view.start + view.mmap.len() as u64,
                None => true,
            };

            if needs_new_view {
                let chunk_start = (offset / self.chunk_size) * self.chunk_size;
                let natural_len = self.chunk_size.min(self.len - chunk_start);
                let needed_len = end.saturating_sub(chunk_start);
                let chunk_len = natural_len.max(needed_len).min(self.len - chunk_start);

                // Safety: the file is only read through this mapping for the
                // lifetime of the accessor; the underlying file is not
                // truncated concurrently by this crate.
                let mmap = unsafe {
                    MmapOptions::new()
                        .offset(chunk_start)
                        .len(chunk_len as usize)
                        .map(&self.file)?
                };
                *active = Some(ActiveView { start: chunk_start, mmap });
            }

            let view = active.as_ref().unwrap();
            let local_start = (offset - view.start) as usize;
            dst.copy_from_slice(&view.mmap[local_start..local_start + dst.len()]);
            Ok(())
        }
    }
}

#[cfg(not(feature = "mmap"))]
mod imp {
    use std::fs::File;

    use crate::error::{DbfResult, Error};

    /// Stub accessor used when the `mmap` feature is disabled; always
    /// returns `UnsupportedFormat`.
    pub struct ChunkedMappedAccessor;

    impl ChunkedMappedAccessor {
        pub fn new(_file: File, _chunk_size: Option<u64>) -> DbfResult<Self> {
            Err(Error::UnsupportedFormat(
                "memory-mapped reading requires the `mmap` feature".to_string(),
            ))
        }

        pub fn len(&self) -> u64 {
            0
        }

        pub fn read_at(&self, _offset: u64, _dst: &mut [u8]) -> DbfResult<()> {
            Err(Error::UnsupportedFormat(
                "memory-mapped reading requires the `mmap` feature".to_string(),
            ))
        }
    }
}

pub use imp::ChunkedMappedAccessor;
