use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type DbfResult<T> = Result<T, Error>;

/// The single error taxonomy for the whole crate.
///
/// Construction-time failures (opening files, parsing the header or the field
/// descriptor table) are always fatal and surface as one of these variants.
/// Per-field and per-record failures are only promoted to `Error` when the
/// reader is constructed with `validate_fields(true)`; otherwise they flow
/// in-band as [`crate::value::Value::Invalid`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("field {field:?} not found")]
    NotFound { field: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("missing memo file for {dbf_path:?}, expected at {expected_memo_path:?}")]
    MissingMemoFile {
        dbf_path: PathBuf,
        expected_memo_path: PathBuf,
    },

    #[error("failed to parse field {field:?} from {raw:?}: {reason}")]
    FieldParseError {
        field: String,
        raw: Vec<u8>,
        reason: String,
    },

    #[error("record truncated: expected {expected} bytes, got {got}")]
    TruncatedRecord { expected: usize, got: usize },

    #[error(transparent)]
    IoError(#[from] io::Error),
}

impl Error {
    pub(crate) fn field_parse(field: &str, raw: &[u8], reason: impl Into<String>) -> Self {
        Error::FieldParseError {
            field: field.to_string(),
            raw: raw.to_vec(),
            reason: reason.into(),
        }
    }
}
