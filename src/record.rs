//! Record view objects (C8): the materialized record (owns decoded values,
//! lazily parsed on first access) and the span record (borrows a
//! caller/reader-owned buffer and never caches).

use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::codepage::CodePage;
use crate::error::DbfResult;
use crate::fields::FieldTable;
use crate::memo::MemoBackend;
use crate::value::{decode_field, DecodeOptions, Value};

/// An owned record. Field values are decoded on first access and cached in
/// a fixed-size slot array indexed by field position.
pub struct MaterializedRecord {
    fields: Arc<FieldTable>,
    memo: Arc<MemoBackend>,
    codepage: CodePage,
    decode_options: DecodeOptions,
    ignore_case: bool,
    /// Record payload, status byte already stripped.
    raw: Vec<u8>,
    cache: Vec<OnceCell<Value>>,
}

impl MaterializedRecord {
    pub(crate) fn new(
        fields: Arc<FieldTable>,
        memo: Arc<MemoBackend>,
        codepage: CodePage,
        decode_options: DecodeOptions,
        raw: Vec<u8>,
        ignore_case: bool,
    ) -> Self {
        let cache = (0..fields.len()).map(|_| OnceCell::new()).collect();
        MaterializedRecord {
            fields,
            memo,
            codepage,
            decode_options,
            ignore_case,
            raw,
            cache,
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.has_field(name, self.ignore_case)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.index_of(name, self.ignore_case)
    }

    /// Decode (or return the cached decode of) the field at `index`.
    pub fn get_by_index(&self, index: usize) -> DbfResult<&Value> {
        if let Some(v) = self.cache[index].get() {
            return Ok(v);
        }
        let descriptor = &self.fields.as_slice()[index];
        let offset = self.fields.field_offset(index);
        let raw = &self.raw[offset..offset + descriptor.length];
        let value = decode_field(descriptor, raw, self.memo.as_ref(), &self.codepage, &self.decode_options)?;
        Ok(self.cache[index].get_or_init(|| value))
    }

    /// Decode the named field, raising [`crate::error::Error::NotFound`] if
    /// no field by that name exists. See [`Self::try_get`] for a lookup that
    /// reports a missing field as `None` instead.
    pub fn get_by_name(&self, name: &str) -> DbfResult<&Value> {
        match self.field_index(name) {
            Some(i) => self.get_by_index(i),
            None => Err(crate::error::Error::NotFound { field: name.to_string() }),
        }
    }

    pub fn try_get(&self, name: &str) -> DbfResult<Option<&Value>> {
        match self.field_index(name) {
            Some(i) => self.get_by_index(i).map(Some),
            None => Ok(None),
        }
    }

    /// Decode every field and collect them into a name-keyed map.
    pub fn to_mapping(&self) -> DbfResult<HashMap<String, Value>> {
        let mut map = HashMap::with_capacity(self.fields.len());
        for (i, f) in self.fields.as_slice().iter().enumerate() {
            map.insert(f.name.clone(), self.get_by_index(i)?.clone());
        }
        Ok(map)
    }

    pub fn get_string(&self, name: &str) -> DbfResult<Option<String>> {
        Ok(match self.try_get(name)? {
            Some(Value::Character(s)) | Some(Value::Varchar(s)) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn get_integer(&self, name: &str) -> DbfResult<Option<i32>> {
        Ok(match self.try_get(name)? {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        })
    }

    pub fn get_decimal(&self, name: &str) -> DbfResult<Option<crate::value::Decimal>> {
        Ok(match self.try_get(name)? {
            Some(Value::Numeric(Some(d))) | Some(Value::Currency(Some(d))) => Some(*d),
            _ => None,
        })
    }

    pub fn get_date(&self, name: &str) -> DbfResult<Option<chrono::NaiveDate>> {
        Ok(match self.try_get(name)? {
            Some(Value::Date(Some(d))) => Some(*d),
            _ => None,
        })
    }

    pub fn get_boolean(&self, name: &str) -> DbfResult<Option<bool>> {
        Ok(match self.try_get(name)? {
            Some(Value::Logical(Some(b))) => Some(*b),
            _ => None,
        })
    }
}

/// A borrowed view over a single record, valid only until the iterator that
/// produced it is advanced again. Getters parse on demand; nothing is
/// cached.
pub struct SpanRecord<'a> {
    pub(crate) fields: &'a FieldTable,
    pub(crate) memo: &'a MemoBackend,
    pub(crate) codepage: CodePage,
    pub(crate) decode_options: DecodeOptions,
    pub(crate) ignore_case: bool,
    /// Record payload, status byte already stripped.
    pub(crate) buf: &'a [u8],
}

impl<'a> SpanRecord<'a> {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.has_field(name, self.ignore_case)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.index_of(name, self.ignore_case)
    }

    /// The raw bytes backing field `index`, with no decoding applied.
    pub fn field_bytes(&self, index: usize) -> &'a [u8] {
        let offset = self.fields.field_offset(index);
        let len = self.fields.as_slice()[index].length;
        &self.buf[offset..offset + len]
    }

    pub fn get_by_index(&self, index: usize) -> DbfResult<Value> {
        let descriptor = &self.fields.as_slice()[index];
        decode_field(descriptor, self.field_bytes(index), self.memo, &self.codepage, &self.decode_options)
    }

    /// Decode the named field, raising [`crate::error::Error::NotFound`] if
    /// no field by that name exists. See [`Self::try_get`] for a lookup that
    /// reports a missing field as `None` instead.
    pub fn get_by_name(&self, name: &str) -> DbfResult<Value> {
        match self.field_index(name) {
            Some(i) => self.get_by_index(i),
            None => Err(crate::error::Error::NotFound { field: name.to_string() }),
        }
    }

    pub fn try_get(&self, name: &str) -> DbfResult<Option<Value>> {
        match self.field_index(name) {
            Some(i) => self.get_by_index(i).map(Some),
            None => Ok(None),
        }
    }
}
