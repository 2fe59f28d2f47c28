use binary_layout::prelude::*;
use log::warn;

use crate::error::{DbfResult, Error};
use crate::header::Version;

define_layout!(field_descriptor, LittleEndian, {
    name: [u8; 11],
    f_type: u8,
    _reserved1: [u8; 4],
    length: u8,
    decimal_count: u8,
    work_area_id: u16,
    example: u8,
    _reserved2: [u8; 10],
    is_production: u8,
});

const DESCRIPTOR_SIZE: usize = 32;
const DESCRIPTOR_SIZE_DBASE2: usize = 16;
const MAX_FIELDS: usize = 255;

/// The closed set of field type tags this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Character,
    Numeric,
    Float,
    Date,
    Logical,
    Memo,
    Integer,
    Currency,
    Double,
    Timestamp,
    TimestampAlternate,
    Varchar,
    Picture,
    General,
    Autoincrement,
    /// Any other single-byte tag; its payload is returned as opaque bytes.
    Other(u8),
}

impl FieldType {
    fn from_byte(b: u8) -> Self {
        match b {
            b'C' => FieldType::Character,
            b'N' => FieldType::Numeric,
            b'F' => FieldType::Float,
            b'D' => FieldType::Date,
            b'L' => FieldType::Logical,
            b'M' => FieldType::Memo,
            b'I' => FieldType::Integer,
            b'Y' => FieldType::Currency,
            b'B' => FieldType::Double,
            b'T' => FieldType::Timestamp,
            b'@' => FieldType::TimestampAlternate,
            b'V' => FieldType::Varchar,
            b'P' => FieldType::Picture,
            b'G' => FieldType::General,
            b'0' => FieldType::Autoincrement,
            other => FieldType::Other(other),
        }
    }

    pub fn is_memo(&self) -> bool {
        matches!(self, FieldType::Memo)
    }
}

/// A single field's decoded descriptor.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    /// Effective byte length of the field's payload within a record.
    ///
    /// For `Character` fields this folds in the decimal-count byte as the
    /// high byte of a 16-bit length (`length | (decimal_count << 8)`),
    /// allowing up to 65 535 bytes; for every other type it is the raw
    /// length byte.
    pub length: usize,
    pub decimal_count: u8,
}

fn name_from_bytes(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

impl FieldDescriptor {
    fn from_bytes_v3(data: &[u8]) -> Self {
        let view = field_descriptor::View::new(data);
        let name = name_from_bytes(view.name());
        let field_type = FieldType::from_byte(view.f_type().read());
        let raw_length = view.length().read();
        let decimal_count = view.decimal_count().read();
        let length = match field_type {
            FieldType::Character => (raw_length as usize) | ((decimal_count as usize) << 8),
            _ => raw_length as usize,
        };
        FieldDescriptor {
            name,
            field_type,
            length,
            decimal_count,
        }
    }

    fn from_bytes_dbase2(data: &[u8]) -> Self {
        let name = name_from_bytes(&data[0..11]);
        let field_type = FieldType::from_byte(data[11]);
        let length = data[12] as usize;
        let decimal_count = data[13];
        FieldDescriptor {
            name,
            field_type,
            length,
            decimal_count,
        }
    }

    /// Validate invariants the decoder itself does not enforce. Called by the
    /// record reader once the whole descriptor table has been walked.
    pub fn validate(&self, version: Version) -> DbfResult<()> {
        match self.field_type {
            FieldType::Integer if self.length != 4 => {
                return Err(Error::InvalidHeader {
                    reason: format!("Integer field {:?} must have length 4, got {}", self.name, self.length),
                });
            }
            FieldType::Logical if self.length != 1 => {
                return Err(Error::InvalidHeader {
                    reason: format!("Logical field {:?} must have length 1, got {}", self.name, self.length),
                });
            }
            FieldType::Currency | FieldType::Double | FieldType::Timestamp | FieldType::TimestampAlternate
                if self.length != 8 =>
            {
                return Err(Error::InvalidHeader {
                    reason: format!("field {:?} must have length 8, got {}", self.name, self.length),
                });
            }
            FieldType::Character if !(1..=65_535).contains(&self.length) => {
                return Err(Error::InvalidHeader {
                    reason: format!("Character field {:?} has out-of-range length {}", self.name, self.length),
                });
            }
            FieldType::Numeric | FieldType::Float if (self.decimal_count as usize) > self.length => {
                return Err(Error::InvalidHeader {
                    reason: format!(
                        "field {:?} has decimal count {} greater than length {}",
                        self.name, self.decimal_count, self.length
                    ),
                });
            }
            FieldType::Memo if !version.supports_memo() => {
                return Err(Error::InvalidHeader {
                    reason: format!("field {:?} is a memo field but version {:?} has no memo support", self.name, version),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

/// Terminator bytes observed while walking the descriptor table.
const TERMINATOR: u8 = 0x0D;
const EOF_MARK: u8 = 0x1A;
const ZERO_MARK: u8 = 0x00;

/// Is the byte at `pos` (within `buf`) a terminator we should trust?
///
/// A `0x0D` at a 32-byte-aligned offset relative to the start of the
/// descriptor table is always trusted. One that is not aligned is only
/// trusted if the preceding 16 bytes look like filler (mostly zero), which is
/// the shape Visual FoxPro and dBASE III-with-memo produce when a stray
/// `0x0D` shows up inside descriptor payload (e.g. inside a default-value
/// expression).
fn is_trusted_terminator(buf: &[u8], pos: usize, descriptor_size: usize) -> bool {
    if buf[pos] != TERMINATOR {
        return false;
    }
    if pos % descriptor_size == 0 {
        return true;
    }
    let start = pos.saturating_sub(16);
    let window = &buf[start..pos];
    let zero_count = window.iter().filter(|&&b| b == 0).count();
    window.len() > 0 && (zero_count * 4) >= (window.len() * 3)
}

/// Walk the field descriptor table starting at `buf[0]`, stopping at the
/// first trusted terminator, an EOF marker, an empty name, a zero-length
/// field, or the 255-field cap — whichever comes first. A parse failure on a
/// single descriptor stops the walk rather than raising, salvaging whatever
/// preceded it.
pub fn decode_descriptors(buf: &[u8], is_dbase2: bool) -> Vec<FieldDescriptor> {
    let descriptor_size = if is_dbase2 { DESCRIPTOR_SIZE_DBASE2 } else { DESCRIPTOR_SIZE };
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos + descriptor_size <= buf.len() && fields.len() < MAX_FIELDS {
        let lead = buf[pos];
        if lead == ZERO_MARK || lead == EOF_MARK {
            break;
        }
        if !is_dbase2 && is_trusted_terminator(buf, pos, descriptor_size) {
            break;
        }
        if is_dbase2 && lead == TERMINATOR {
            break;
        }

        let window = &buf[pos..pos + descriptor_size];
        let descriptor = if is_dbase2 {
            FieldDescriptor::from_bytes_dbase2(window)
        } else {
            FieldDescriptor::from_bytes_v3(window)
        };

        if descriptor.name.is_empty() || descriptor.length == 0 {
            warn!("stopping descriptor walk at field {}: empty name or zero length", fields.len());
            break;
        }

        fields.push(descriptor);
        pos += descriptor_size;
    }

    fields
}

/// A shared, immutable field list plus the name lookup index built over it.
#[derive(Debug, Clone)]
pub struct FieldTable {
    fields: Vec<FieldDescriptor>,
}

impl FieldTable {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        FieldTable { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_slice(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn record_payload_len(&self) -> usize {
        self.fields.iter().map(|f| f.length).sum()
    }

    /// Look up a field index by name. `ignore_case` controls whether the
    /// comparison folds ASCII case.
    pub fn index_of(&self, name: &str, ignore_case: bool) -> Option<usize> {
        self.fields.iter().position(|f| {
            if ignore_case {
                f.name.eq_ignore_ascii_case(name)
            } else {
                f.name == name
            }
        })
    }

    pub fn has_field(&self, name: &str, ignore_case: bool) -> bool {
        self.index_of(name, ignore_case).is_some()
    }

    /// Byte offset of field `index`'s payload within a record, not counting
    /// the leading status byte.
    pub fn field_offset(&self, index: usize) -> usize {
        self.fields[..index].iter().map(|f| f.length).sum()
    }
}
