use crate::error::DbfResult;
use crate::memo::MemoPayload;
use crate::value::MemoSource;

/// A memo backend for tables whose version does not declare memo support,
/// or whose sidecar is missing and `ignore_missing_memo` is set. Always
/// answers "no memo".
pub struct NullMemoReader;

impl MemoSource for NullMemoReader {
    fn lookup(&self, _index: u32) -> DbfResult<Option<MemoPayload>> {
        Ok(None)
    }
}
