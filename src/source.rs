//! Byte sources a [`crate::reader::Reader`] can be built over: a plain file
//! stream, a caller-supplied generic stream, or the chunked memory-mapped
//! accessor (C6).

use std::fs::File;
use std::io::{self, BufReader, Read};

use crate::mmap::ChunkedMappedAccessor;

/// Sequential record-sized reads over whatever backs a table.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes, filling as much of `buf` as the
    /// underlying source currently has. Returns the number of bytes
    /// actually read; fewer than `buf.len()` means a short read (EOF hit
    /// mid-record, or no more data at all when it returns exactly 0).
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

pub(crate) fn read_fully_or_short(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// A source backed by the chunked mapped accessor, tracking its own
/// sequential read cursor.
pub struct MappedStream {
    accessor: ChunkedMappedAccessor,
    cursor: u64,
}

impl MappedStream {
    pub fn new(accessor: ChunkedMappedAccessor, start: u64) -> Self {
        MappedStream { accessor, cursor: start }
    }
}

impl ByteSource for MappedStream {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.accessor.len().saturating_sub(self.cursor);
        let to_read = (buf.len() as u64).min(remaining) as usize;
        if to_read == 0 {
            return Ok(0);
        }
        self.accessor
            .read_at(self.cursor, &mut buf[..to_read])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.cursor += to_read as u64;
        Ok(to_read)
    }
}

/// The two byte sources a path-backed reader can use, selected by
/// `ReaderOptions::use_memory_mapping`.
pub enum Source {
    File(BufReader<File>),
    Mapped(MappedStream),
}

impl ByteSource for Source {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::File(r) => read_fully_or_short(r, buf),
            Source::Mapped(m) => m.read_chunk(buf),
        }
    }
}

/// A source over a caller-supplied stream. Seekable streams are repositioned
/// at the start of record data once, when iteration begins; non-seekable
/// streams must only be consumed in a single forward pass.
pub struct GenericStream<R> {
    inner: R,
}

impl<R: Read> GenericStream<R> {
    pub fn new(inner: R) -> Self {
        GenericStream { inner }
    }
}

impl<R: Read> ByteSource for GenericStream<R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_fully_or_short(&mut self.inner, buf)
    }
}
