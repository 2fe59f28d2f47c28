//! Reads dBASE-family `.dbf` tables (dBASE II/III/IV, FoxPro, Visual FoxPro)
//! and their `.dbt`/`.fpt` memo sidecars.
//!
//! ```no_run
//! use xbase_table::{Reader, ReaderOptions};
//!
//! let mut reader = Reader::open("people.dbf", ReaderOptions::default())?;
//! for record in reader.records() {
//!     let record = record?;
//!     println!("{:?}", record.get_string("NAME")?);
//! }
//! # Ok::<(), xbase_table::Error>(())
//! ```

mod codepage;
mod error;
mod fields;
mod header;
mod memo;
mod mmap;
mod pool;
mod record;
mod reader;
mod source;
mod value;

pub use codepage::CodePage;
pub use error::{DbfResult, Error};
pub use fields::{FieldDescriptor, FieldTable, FieldType};
pub use header::{Header, Version};
pub use memo::{Db3MemoReader, Db4MemoReader, MemoBackend, MemoOptions, MemoPayload, NullMemoReader, VfpMemoReader};
pub use mmap::ChunkedMappedAccessor;
pub use record::{MaterializedRecord, SpanRecord};
pub use reader::{Cancellation, MaterializedRecords, Reader, ReaderOptions, SpanRecords, Stats, WarningHandler};
pub use source::{ByteSource, GenericStream, Source};
pub use value::{Decimal, DecodeOptions, MemoSource, MemoValue, Value};
