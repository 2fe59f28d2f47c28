use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{DbfResult, Error};
use crate::memo::{MemoOptions, MemoPayload};
use crate::value::MemoSource;

const HEADER_SIZE: u64 = 512;

/// Visual FoxPro FPT reader. The 512-byte file header carries a next-free-
/// block pointer and the sidecar's block size; each memo block opens with
/// an 8-byte header (`type: u32 BE`, `length: u32 BE`) where
/// `type ∈ {0: picture, 1: text, 2: object}` (anything else is returned as
/// opaque binary).
pub struct VfpMemoReader {
    file: Mutex<File>,
    len: u64,
    block_size: u64,
    options: MemoOptions,
    #[allow(dead_code)]
    next_block: u32,
}

impl VfpMemoReader {
    pub fn open(path: &Path, options: MemoOptions) -> DbfResult<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut header = [0u8; HEADER_SIZE as usize];
        let to_read = (HEADER_SIZE as usize).min(len as usize);
        file.read_exact(&mut header[..to_read])?;

        let next_block = u32::from_be_bytes(header[0..4].try_into().unwrap());
        let mut block_size = u16::from_be_bytes(header[6..8].try_into().unwrap()) as u64;
        if block_size == 0 {
            block_size = HEADER_SIZE;
        }

        Ok(VfpMemoReader {
            file: Mutex::new(file),
            len,
            block_size,
            options,
            next_block,
        })
    }
}

impl MemoSource for VfpMemoReader {
    fn lookup(&self, index: u32) -> DbfResult<Option<MemoPayload>> {
        if index == 0 {
            return Ok(None);
        }
        let start = index as u64 * self.block_size;
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

        let block_type = u32::from_be_bytes(header[0..4].try_into().unwrap());
        let length = u32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;

        let remaining = self.len.saturating_sub(start + 8) as usize;
        let read_len = length.min(remaining);
        if read_len < length && self.options.validate_fields {
            return Err(Error::TruncatedRecord {
                expected: length,
                got: read_len,
            });
        }
        let mut payload = vec![0u8; read_len];
        file.read_exact(&mut payload)?;

        Ok(Some(match block_type {
            0 => MemoPayload::Picture(payload),
            1 => MemoPayload::Text(payload),
            2 => MemoPayload::Object(payload),
            _ => MemoPayload::Binary(payload),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_header(block_size: u16) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&1u32.to_be_bytes());
        header[6..8].copy_from_slice(&block_size.to_be_bytes());
        header
    }

    fn block(block_type: u32, payload: &[u8], block_size: usize) -> Vec<u8> {
        let mut block = vec![0u8; block_size];
        block[0..4].copy_from_slice(&block_type.to_be_bytes());
        block[4..8].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        block[8..8 + payload.len()].copy_from_slice(payload);
        block
    }

    /// Splices `block_bytes` into `buf` at absolute offset `index *
    /// block_size`, growing `buf` with zeroes as needed.
    fn place_block(buf: &mut Vec<u8>, index: u64, block_size: u64, block_bytes: &[u8]) {
        let start = (index * block_size) as usize;
        if buf.len() < start + block_bytes.len() {
            buf.resize(start + block_bytes.len(), 0);
        }
        buf[start..start + block_bytes.len()].copy_from_slice(block_bytes);
    }

    #[test]
    fn reads_text_block() {
        let mut f = NamedTempFile::new().unwrap();
        let mut data = file_header(64);
        place_block(&mut data, 1, 64, &block(1, b"line one\nline two", 64));
        f.write_all(&data).unwrap();

        let reader = VfpMemoReader::open(f.path(), MemoOptions::default()).unwrap();
        let payload = reader.lookup(1).unwrap().unwrap();
        match payload {
            MemoPayload::Text(bytes) => assert_eq!(bytes, b"line one\nline two"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn tags_picture_and_object_blocks() {
        let mut f = NamedTempFile::new().unwrap();
        let mut data = file_header(64);
        place_block(&mut data, 1, 64, &block(0, b"picturebytes", 64));
        place_block(&mut data, 2, 64, &block(2, b"objectbytes!", 64));
        f.write_all(&data).unwrap();

        let reader = VfpMemoReader::open(f.path(), MemoOptions::default()).unwrap();
        assert!(matches!(reader.lookup(1).unwrap().unwrap(), MemoPayload::Picture(_)));
        assert!(matches!(reader.lookup(2).unwrap().unwrap(), MemoPayload::Object(_)));
    }

    #[test]
    fn index_zero_is_no_memo() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&file_header(64)).unwrap();
        let reader = VfpMemoReader::open(f.path(), MemoOptions::default()).unwrap();
        assert!(reader.lookup(0).unwrap().is_none());
    }

    #[test]
    fn bounds_violation_fails_only_when_validating() {
        let mut f = NamedTempFile::new().unwrap();
        let data = file_header(64);
        f.write_all(&data).unwrap();

        let lenient = VfpMemoReader::open(f.path(), MemoOptions::default()).unwrap();
        assert!(lenient.lookup(1).unwrap().is_none());

        let strict = VfpMemoReader::open(
            f.path(),
            MemoOptions {
                ignore_missing_memo: false,
                validate_fields: true,
            },
        )
        .unwrap();
        assert!(strict.lookup(1).is_err());
    }

    #[test]
    fn truncated_payload_fails_only_when_validating() {
        let mut f = NamedTempFile::new().unwrap();
        let mut data = file_header(64);
        // Block header declares a 20-byte payload but the file ends 5 bytes in.
        let mut short_block = vec![0u8; 8 + 5];
        short_block[0..4].copy_from_slice(&1u32.to_be_bytes());
        short_block[4..8].copy_from_slice(&20u32.to_be_bytes());
        place_block(&mut data, 1, 64, &short_block);
        data.truncate(64 + 8 + 5);
        f.write_all(&data).unwrap();

        let lenient = VfpMemoReader::open(f.path(), MemoOptions::default()).unwrap();
        assert!(lenient.lookup(1).unwrap().is_some());

        let strict = VfpMemoReader::open(
            f.path(),
            MemoOptions {
                ignore_missing_memo: false,
                validate_fields: true,
            },
        )
        .unwrap();
        assert!(strict.lookup(1).is_err());
    }
}
