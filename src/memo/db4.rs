use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{DbfResult, Error};
use crate::memo::{MemoOptions, MemoPayload};
use crate::pool::{BufferPool, PooledBuffer, POOLING_THRESHOLD};
use crate::value::MemoSource;

const BLOCK_SIZE: u64 = 512;
const RESERVED_MAGIC: u32 = 0x0008_FFFF;
const EARLY_TERMINATOR: u8 = 0x1F;

enum Scratch {
    Stack([u8; POOLING_THRESHOLD], usize),
    Pooled(PooledBuffer),
}

impl Scratch {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Scratch::Stack(buf, len) => &mut buf[..*len],
            Scratch::Pooled(p) => &mut p[..],
        }
    }
}

/// dBASE IV DBT reader. Each block opens with an 8-byte header
/// (`reserved: u32 LE`, `length: u32 LE`) followed by `length` bytes of
/// payload; a stray `0x1F` inside the payload also terminates it early.
pub struct Db4MemoReader {
    file: Mutex<File>,
    len: u64,
    options: MemoOptions,
    pool: BufferPool,
}

impl Db4MemoReader {
    pub fn open(path: &Path, options: MemoOptions) -> DbfResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Db4MemoReader {
            file: Mutex::new(file),
            len,
            options,
            pool: BufferPool::new(),
        })
    }
}

impl MemoSource for Db4MemoReader {
    fn lookup(&self, index: u32) -> DbfResult<Option<MemoPayload>> {
        if index == 0 {
            return Ok(None);
        }
        let start = index as u64 * BLOCK_SIZE;
        if start + 8 > self.len {
            if self.options.validate_fields {
                return Err(Error::TruncatedRecord {
                    expected: 8,
                    got: self.len.saturating_sub(start) as usize,
                });
            }
            return Ok(None);
        }

        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(start))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;

        let reserved = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let length = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

        if self.options.validate_fields && reserved != RESERVED_MAGIC {
            return Err(Error::InvalidHeader {
                reason: format!("dBASE IV memo block reserved word mismatch: 0x{reserved:08x}"),
            });
        }

        let remaining = self.len.saturating_sub(start + 8) as usize;
        let read_len = length.min(remaining);
        if read_len < length && self.options.validate_fields {
            return Err(Error::TruncatedRecord {
                expected: length,
                got: read_len,
            });
        }

        let mut scratch = if read_len <= POOLING_THRESHOLD {
            Scratch::Stack([0u8; POOLING_THRESHOLD], read_len)
        } else {
            Scratch::Pooled(self.pool.rent(read_len))
        };
        file.read_exact(scratch.as_mut_slice())?;

        let data = scratch.as_mut_slice();
        let payload = match data.iter().position(|&b| b == EARLY_TERMINATOR) {
            Some(pos) => data[..pos].to_vec(),
            None => data.to_vec(),
        };

        Ok(Some(MemoPayload::Text(payload)))
    }
}
