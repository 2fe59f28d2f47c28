use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use crate::error::DbfResult;
use crate::memo::MemoPayload;
use crate::value::MemoSource;

const BLOCK_SIZE: u64 = 512;
const TERMINATOR: u8 = 0x1A;

/// dBASE III DBT reader. Blocks are raw 512-byte chunks with no length
/// prefix; a memo's payload runs until a `0x1A` terminator byte, which may
/// span multiple blocks.
pub struct Db3MemoReader {
    file: Mutex<File>,
    len: u64,
}

impl Db3MemoReader {
    pub fn open(path: &Path) -> DbfResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Db3MemoReader {
            file: Mutex::new(file),
            len,
        })
    }
}

impl MemoSource for Db3MemoReader {
    fn lookup(&self, index: u32) -> DbfResult<Option<MemoPayload>> {
        if index == 0 {
            return Ok(None);
        }
        let start = index as u64 * BLOCK_SIZE;
        if start >= self.len {
            return Ok(None);
        }

        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(start))?;

        let mut payload = Vec::new();
        let mut chunk = [0u8; BLOCK_SIZE as usize];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                // Ran off the end of the file without finding a terminator;
                // this is the open question noted in the design notes: a
                // stray terminator-less memo truncates to whatever was read.
                break;
            }
            match chunk[..n].iter().position(|&b| b == TERMINATOR) {
                Some(pos) => {
                    payload.extend_from_slice(&chunk[..pos]);
                    break;
                }
                None => payload.extend_from_slice(&chunk[..n]),
            }
        }

        Ok(Some(MemoPayload::Text(payload)))
    }
}
