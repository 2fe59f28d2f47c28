//! The record reader (C7): construction, the two iteration APIs, load/unload
//! random access, and the options/statistics/warning surface around them.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::codepage::{self, CodePage};
use crate::error::{DbfResult, Error};
use crate::fields::{self, FieldTable};
use crate::header::{Header, Version};
use crate::memo::{self, MemoBackend, MemoOptions};
use crate::mmap::ChunkedMappedAccessor;
use crate::pool::{BufferPool, PooledBuffer, POOLING_THRESHOLD};
use crate::record::{MaterializedRecord, SpanRecord};
use crate::source::{ByteSource, GenericStream, MappedStream, Source};
use crate::value::DecodeOptions;

/// A caller-supplied cancellation check, consulted between records.
pub type Cancellation = Arc<dyn Fn() -> bool + Send + Sync>;

/// A subscriber to the reader's warning channel.
pub type WarningHandler = Box<dyn Fn(&str) + Send>;

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Every knob a caller can set, built up through chained `with_*` calls.
#[derive(Clone)]
pub struct ReaderOptions {
    encoding: Option<String>,
    ignore_case: bool,
    trim_strings: bool,
    ignore_missing_memo: bool,
    validate_fields: bool,
    use_memory_mapping: bool,
    buffer_size: usize,
    skip_deleted: bool,
    max_records: Option<u64>,
    character_decode_fallback: Option<char>,
    mmap_chunk_size: Option<u64>,
    cancellation: Option<Cancellation>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            encoding: None,
            ignore_case: false,
            trim_strings: true,
            ignore_missing_memo: false,
            validate_fields: false,
            use_memory_mapping: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            skip_deleted: true,
            max_records: None,
            character_decode_fallback: None,
            mmap_chunk_size: None,
            cancellation: None,
        }
    }
}

impl ReaderOptions {
    pub fn with_encoding(mut self, name: impl Into<String>) -> Self {
        self.encoding = Some(name.into());
        self
    }

    pub fn with_ignore_case(mut self, v: bool) -> Self {
        self.ignore_case = v;
        self
    }

    pub fn with_trim_strings(mut self, v: bool) -> Self {
        self.trim_strings = v;
        self
    }

    pub fn with_ignore_missing_memo(mut self, v: bool) -> Self {
        self.ignore_missing_memo = v;
        self
    }

    pub fn with_validate_fields(mut self, v: bool) -> Self {
        self.validate_fields = v;
        self
    }

    pub fn with_memory_mapping(mut self, v: bool) -> Self {
        self.use_memory_mapping = v;
        self
    }

    pub fn with_mmap_chunk_size(mut self, bytes: u64) -> Self {
        self.mmap_chunk_size = Some(bytes);
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }

    pub fn with_skip_deleted(mut self, v: bool) -> Self {
        self.skip_deleted = v;
        self
    }

    pub fn with_max_records(mut self, n: u64) -> Self {
        self.max_records = Some(n);
        self
    }

    pub fn with_character_decode_fallback(mut self, c: char) -> Self {
        self.character_decode_fallback = Some(c);
        self
    }

    pub fn with_cancellation<F: Fn() -> bool + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.cancellation = Some(Arc::new(f));
        self
    }
}

/// A snapshot of table-level information, returned by [`Reader::stats`].
#[derive(Debug, Clone)]
pub struct Stats {
    pub table_name: Option<String>,
    pub version: Version,
    pub last_updated: Option<NaiveDate>,
    pub total_records: u64,
    pub active_records: u64,
    pub deleted_records: u64,
    pub field_count: usize,
    pub record_length: usize,
    pub header_length: usize,
    pub encoding_name: &'static str,
    pub memo_path: Option<PathBuf>,
    pub loaded: bool,
}

enum RecordBuffer {
    Owned(Vec<u8>),
    Pooled(PooledBuffer),
}

impl RecordBuffer {
    fn new(pool: &BufferPool, len: usize) -> Self {
        if len > POOLING_THRESHOLD {
            RecordBuffer::Pooled(pool.rent(len))
        } else {
            RecordBuffer::Owned(vec![0u8; len])
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            RecordBuffer::Owned(v) => v.as_mut_slice(),
            RecordBuffer::Pooled(p) => &mut p[..],
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            RecordBuffer::Owned(v) => v.as_slice(),
            RecordBuffer::Pooled(p) => &p[..],
        }
    }
}

enum RecordStatus {
    Active,
    Deleted,
    Eof,
}

const DELETED_MARK: u8 = 0x2A;
const EOF_MARK: u8 = 0x1A;

struct LoadedTables {
    active: Vec<MaterializedRecord>,
    deleted: Vec<MaterializedRecord>,
}

/// Reads the fixed 32-byte (or 8-byte, for dBASE II) header plus the field
/// descriptor table from an already-open file, leaving the file's read
/// position at the first record. Handles the irregular dBASE II layout by
/// carrying forward whatever descriptor bytes were already consumed as part
/// of the initial probe read.
fn read_header_and_fields(file: &File) -> DbfResult<(Header, FieldTable)> {
    let mut f = file;
    let file_len = file.metadata()?.len();
    let probe_len = 32usize.min(file_len as usize);
    let mut probe = vec![0u8; probe_len];
    f.read_exact(&mut probe)?;

    let mut header = Header::from_bytes(&probe)?;
    let is_dbase2 = header.version.is_dbase2();
    let fixed_header_len = if is_dbase2 { 8 } else { 32 };
    let mut buf: Vec<u8> = if probe.len() > fixed_header_len {
        probe[fixed_header_len..].to_vec()
    } else {
        Vec::new()
    };

    let fields = if is_dbase2 {
        loop {
            let decoded = fields::decode_descriptors(&buf, true);
            if decoded.len() * 16 < buf.len() || decoded.len() >= 255 {
                break decoded;
            }
            let mut chunk = [0u8; 16];
            f.read_exact(&mut chunk)?;
            buf.extend_from_slice(&chunk);
        }
    } else {
        let descriptor_bytes_len = header.n_header_bytes.saturating_sub(32);
        if buf.len() < descriptor_bytes_len {
            let mut rest = vec![0u8; descriptor_bytes_len - buf.len()];
            f.read_exact(&mut rest)?;
            buf.extend_from_slice(&rest);
        }
        fields::decode_descriptors(&buf, false)
    };

    if is_dbase2 {
        header.finish_dbase2(fields.len());
    }

    for field in &fields {
        field.validate(header.version)?;
    }

    Ok((header, FieldTable::new(fields)))
}

/// Reads dBASE-family tables: header and field descriptors at construction,
/// then records through either of the two iteration APIs or random access
/// once loaded. See the crate root docs for the overall model.
pub struct Reader<S: ByteSource> {
    header: Header,
    fields: Arc<FieldTable>,
    memo: Arc<MemoBackend>,
    codepage: CodePage,
    options: ReaderOptions,
    source: S,
    path: Option<PathBuf>,
    memo_path: Option<PathBuf>,
    pool: BufferPool,
    active_seen: u64,
    deleted_seen: u64,
    yielded: u64,
    loaded: Option<LoadedTables>,
    warning_handlers: Vec<WarningHandler>,
}

impl Reader<Source> {
    /// Open a table from a path on disk.
    pub fn open<P: AsRef<Path>>(path: P, options: ReaderOptions) -> DbfResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let (header, fields) = read_header_and_fields(&file)?;

        let codepage = codepage::resolve(header.language_driver_byte(), options.encoding.as_deref());
        let memo_options = MemoOptions {
            ignore_missing_memo: options.ignore_missing_memo,
            validate_fields: options.validate_fields,
        };
        let memo = memo::open(path, header.version, memo_options)?;
        let memo_path = if header.version.supports_memo() {
            memo::find_sidecar(path)
        } else {
            None
        };

        let source = if options.use_memory_mapping {
            let accessor = ChunkedMappedAccessor::new(file, options.mmap_chunk_size)?;
            Source::Mapped(MappedStream::new(accessor, header.n_header_bytes as u64))
        } else {
            Source::File(BufReader::with_capacity(options.buffer_size, file))
        };

        Ok(Reader {
            header,
            fields: Arc::new(fields),
            memo: Arc::new(memo),
            codepage,
            options,
            source,
            path: Some(path.to_path_buf()),
            memo_path,
            pool: BufferPool::new(),
            active_seen: 0,
            deleted_seen: 0,
            yielded: 0,
            loaded: None,
            warning_handlers: Vec::new(),
        })
    }
}

impl<R: Read> Reader<GenericStream<R>> {
    /// Build a reader over an arbitrary stream. Memory mapping is not
    /// available this way (there is no path to map), and no memo sidecar is
    /// opened — memo fields always decode to `Value::Memo(None)`.
    pub fn from_reader(inner: R, options: ReaderOptions) -> DbfResult<Self> {
        if options.use_memory_mapping {
            return Err(Error::UnsupportedFormat(
                "memory mapping requires a path-backed reader".to_string(),
            ));
        }

        let mut buf_for_probe = Vec::new();
        let mut limited = inner;
        // We need random-ish access to read the header and descriptor table
        // before handing the stream off as a sequential source; since R is
        // only `Read`, we buffer everything consumed so far ourselves.
        let mut probe = [0u8; 32];
        let n = read_fully(&mut limited, &mut probe)?;
        buf_for_probe.extend_from_slice(&probe[..n]);

        let mut header = Header::from_bytes(&buf_for_probe)?;
        let is_dbase2 = header.version.is_dbase2();
        let fixed_header_len = if is_dbase2 { 8 } else { 32 };
        let mut descriptor_buf: Vec<u8> = if buf_for_probe.len() > fixed_header_len {
            buf_for_probe[fixed_header_len..].to_vec()
        } else {
            Vec::new()
        };

        let fields = if is_dbase2 {
            loop {
                let decoded = fields::decode_descriptors(&descriptor_buf, true);
                if decoded.len() * 16 < descriptor_buf.len() || decoded.len() >= 255 {
                    break decoded;
                }
                let mut chunk = [0u8; 16];
                read_exact_stream(&mut limited, &mut chunk)?;
                descriptor_buf.extend_from_slice(&chunk);
            }
        } else {
            let descriptor_bytes_len = header.n_header_bytes.saturating_sub(32);
            if descriptor_buf.len() < descriptor_bytes_len {
                let mut rest = vec![0u8; descriptor_bytes_len - descriptor_buf.len()];
                read_exact_stream(&mut limited, &mut rest)?;
                descriptor_buf.extend_from_slice(&rest);
            }
            fields::decode_descriptors(&descriptor_buf, false)
        };

        if is_dbase2 {
            header.finish_dbase2(fields.len());
        }
        for field in &fields {
            field.validate(header.version)?;
        }

        let codepage = codepage::resolve(header.language_driver_byte(), options.encoding.as_deref());
        let memo = MemoBackend::Null(crate::memo::NullMemoReader);

        Ok(Reader {
            header,
            fields: Arc::new(FieldTable::new(fields)),
            memo: Arc::new(memo),
            codepage,
            options,
            source: GenericStream::new(limited),
            path: None,
            memo_path: None,
            pool: BufferPool::new(),
            active_seen: 0,
            deleted_seen: 0,
            yielded: 0,
            loaded: None,
            warning_handlers: Vec::new(),
        })
    }
}

fn read_fully(r: &mut impl Read, buf: &mut [u8]) -> DbfResult<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

fn read_exact_stream(r: &mut impl Read, buf: &mut [u8]) -> DbfResult<()> {
    let n = read_fully(r, buf)?;
    if n < buf.len() {
        return Err(Error::TruncatedRecord { expected: buf.len(), got: n });
    }
    Ok(())
}

impl<S: ByteSource> Reader<S> {
    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            trim_strings: self.options.trim_strings,
            validate_fields: self.options.validate_fields,
            character_decode_fallback: self.options.character_decode_fallback,
        }
    }

    fn push_warning(&self, message: &str) {
        log::warn!("{message}");
        for handler in &self.warning_handlers {
            handler(message);
        }
    }

    /// Subscribe to the warning channel. Multiple subscribers may be added.
    pub fn on_warning<F: Fn(&str) + Send + 'static>(&mut self, handler: F) {
        self.warning_handlers.push(Box::new(handler));
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.index_of(name, self.options.ignore_case)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.has_field(name, self.options.ignore_case)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            table_name: self
                .path
                .as_ref()
                .and_then(|p| p.file_stem())
                .and_then(|s| s.to_str())
                .map(|s| s.to_string()),
            version: self.header.version,
            last_updated: self.header.last_updated,
            total_records: self.header.n_records,
            active_records: self.active_seen,
            deleted_records: self.deleted_seen,
            field_count: self.fields.len(),
            record_length: self.header.n_record_bytes,
            header_length: self.header.n_header_bytes,
            encoding_name: self.codepage.name(),
            memo_path: self.memo_path.clone(),
            loaded: self.loaded.is_some(),
        }
    }

    fn read_one(&mut self, buf: &mut [u8]) -> DbfResult<RecordStatus> {
        let n = self.source.read_chunk(buf).map_err(Error::IoError)?;
        if n == 0 {
            return Ok(RecordStatus::Eof);
        }
        if n < buf.len() {
            self.push_warning(&format!("truncated record: expected {} bytes, got {n}", buf.len()));
            return Ok(RecordStatus::Eof);
        }
        match buf[0] {
            EOF_MARK => Ok(RecordStatus::Eof),
            DELETED_MARK => {
                self.deleted_seen += 1;
                Ok(RecordStatus::Deleted)
            }
            _ => {
                self.active_seen += 1;
                Ok(RecordStatus::Active)
            }
        }
    }

    /// Advance to the next record this reader's options say should be
    /// yielded, filling `buf` (status byte included) and returning `true`;
    /// `false` at soft EOF, a truncated tail, `max_records`, or cancellation.
    fn next_record_buf(&mut self, buf: &mut [u8]) -> DbfResult<bool> {
        loop {
            if let Some(max) = self.options.max_records {
                if self.yielded >= max {
                    return Ok(false);
                }
            }
            if let Some(cancel) = self.options.cancellation.clone() {
                if cancel() {
                    return Ok(false);
                }
            }
            match self.read_one(buf)? {
                RecordStatus::Eof => return Ok(false),
                RecordStatus::Deleted => {
                    if self.options.skip_deleted {
                        continue;
                    }
                    self.yielded += 1;
                    return Ok(true);
                }
                RecordStatus::Active => {
                    self.yielded += 1;
                    return Ok(true);
                }
            }
        }
    }

    fn make_materialized(&self, buf: Vec<u8>) -> MaterializedRecord {
        MaterializedRecord::new(
            self.fields.clone(),
            self.memo.clone(),
            self.codepage,
            self.decode_options(),
            buf[1..].to_vec(),
            self.options.ignore_case,
        )
    }

    /// An iterator of owned, lazily-decoded records.
    pub fn records(&mut self) -> MaterializedRecords<'_, S> {
        MaterializedRecords { reader: self }
    }

    /// A zero-copy cursor over records; see [`SpanRecords::next`].
    pub fn span_records(&mut self) -> SpanRecords<'_, S> {
        let len = self.header.n_record_bytes;
        let pool = self.pool.clone();
        SpanRecords {
            reader: self,
            buf: RecordBuffer::new(&pool, len),
        }
    }

    /// Advance over `n` active (non-skipped) records without materializing
    /// them.
    pub fn skip(&mut self, n: u64) -> DbfResult<u64> {
        let len = self.header.n_record_bytes;
        let mut scratch = vec![0u8; len];
        let mut skipped = 0;
        for _ in 0..n {
            if !self.next_record_buf(&mut scratch)? {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Materialize every remaining record (active and deleted) into two
    /// index-addressed lists, enabling `record_at`/`deleted_at`.
    pub fn load(&mut self) -> DbfResult<()> {
        let len = self.header.n_record_bytes;
        let mut active = Vec::new();
        let mut deleted = Vec::new();
        loop {
            let mut buf = vec![0u8; len];
            match self.read_one(&mut buf)? {
                RecordStatus::Eof => break,
                RecordStatus::Deleted => deleted.push(self.make_materialized(buf)),
                RecordStatus::Active => active.push(self.make_materialized(buf)),
            }
        }
        self.loaded = Some(LoadedTables { active, deleted });
        Ok(())
    }

    /// Discard any records materialized by `load`.
    pub fn unload(&mut self) {
        self.loaded = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Random access into the active-record list populated by `load`.
    pub fn record_at(&self, index: usize) -> Option<&MaterializedRecord> {
        self.loaded.as_ref()?.active.get(index)
    }

    /// Random access into the deleted-record list populated by `load`.
    pub fn deleted_at(&self, index: usize) -> Option<&MaterializedRecord> {
        self.loaded.as_ref()?.deleted.get(index)
    }
}

/// An iterator over owned, lazily-decoded records. See [`MaterializedRecord`].
pub struct MaterializedRecords<'a, S: ByteSource> {
    reader: &'a mut Reader<S>,
}

impl<'a, S: ByteSource> Iterator for MaterializedRecords<'a, S> {
    type Item = DbfResult<MaterializedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.reader.header.n_record_bytes;
        let mut buf = vec![0u8; len];
        match self.reader.next_record_buf(&mut buf) {
            Ok(true) => Some(Ok(self.reader.make_materialized(buf))),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// A zero-copy cursor over records, reusing one buffer across steps. Not a
/// `std::iter::Iterator` — the borrow returned by `next` is tied to the
/// `&mut self` of that call, which a lending iterator cannot express through
/// that trait on stable Rust.
pub struct SpanRecords<'a, S: ByteSource> {
    reader: &'a mut Reader<S>,
    buf: RecordBuffer,
}

impl<'a, S: ByteSource> SpanRecords<'a, S> {
    pub fn next(&mut self) -> Option<DbfResult<SpanRecord<'_>>> {
        match self.reader.next_record_buf(self.buf.as_mut_slice()) {
            Ok(true) => Some(Ok(SpanRecord {
                fields: self.reader.fields.as_ref(),
                memo: self.reader.memo.as_ref(),
                codepage: self.reader.codepage,
                decode_options: self.reader.decode_options(),
                ignore_case: self.reader.options.ignore_case,
                buf: &self.buf.as_slice()[1..],
            })),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
