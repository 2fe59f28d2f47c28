use binary_layout::prelude::*;
use chrono::NaiveDate;
use log::warn;

use crate::error::DbfResult;

// 3 bytes representing YYMMDD, where YY is years since either 1900 or 2000.
define_layout!(yymmdd, LittleEndian, {
    year: u8,
    month: u8,
    day: u8,
});

define_layout!(dbase_header, LittleEndian, {
    version: u8,
    last_updated: yymmdd::NestedView,
    n_records: u32,
    n_header_bytes: u16,
    n_record_bytes: u16,
    _reserved1: [u8; 2],
    incomplete_transaction: u8,
    encrypted: u8,
    _reserved2: [u8; 12],
    mdx_flag: u8,
    language_driver_id: u8,
    _reserved3: [u8; 2],
});

const DBASE2_VERSION: u8 = 0x02;

/// The dBASE dialect a table header declares itself to be.
///
/// The version byte is a bitfield on every dialect after dBASE II: bits 0-2
/// select the base version, bit 3 flags a DOS memo file, bits 4-6 flag a SQL
/// table, and bit 7 flags the presence of any memo file (DBT or FPT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    DBase2,
    FoxBaseDBase3NoMemo,
    DBase3WithMemo,
    VisualFoxProNoMemo,
    VisualFoxProWithMemo,
    VisualFoxProWithVarchar,
    DBase4SqlTableNoMemo,
    DBase4SqlTableWithMemo,
    DBase4WithMemo,
    FoxProWithMemo,
    /// A version byte this crate does not recognize. The reader continues in
    /// permissive mode, assuming no memo support, and emits a warning.
    Unknown(u8),
}

impl Version {
    fn from_byte(b: u8) -> Self {
        match b {
            0x02 => Version::DBase2,
            0x03 => Version::FoxBaseDBase3NoMemo,
            0x83 => Version::DBase3WithMemo,
            0x30 => Version::VisualFoxProNoMemo,
            0x31 => Version::VisualFoxProWithVarchar,
            0x32 => Version::VisualFoxProWithMemo,
            0x43 => Version::DBase4SqlTableNoMemo,
            0x63 => Version::DBase4SqlTableWithMemo,
            0x8B => Version::DBase4WithMemo,
            0xF5 => Version::FoxProWithMemo,
            other => Version::Unknown(other),
        }
    }

    /// Whether tables of this version can carry a memo sidecar at all.
    pub fn supports_memo(&self) -> bool {
        match self {
            Version::DBase2 => false,
            Version::FoxBaseDBase3NoMemo => false,
            Version::DBase3WithMemo => true,
            Version::VisualFoxProNoMemo => false,
            Version::VisualFoxProWithMemo => true,
            Version::VisualFoxProWithVarchar => true,
            Version::DBase4SqlTableNoMemo => false,
            Version::DBase4SqlTableWithMemo => true,
            Version::DBase4WithMemo => true,
            Version::FoxProWithMemo => true,
            // Bit 7 of the raw byte flags "any memo file" on every post-dBASE-II dialect.
            Version::Unknown(b) => b & 0x80 != 0,
        }
    }

    pub fn is_visual_foxpro(&self) -> bool {
        matches!(
            self,
            Version::VisualFoxProNoMemo
                | Version::VisualFoxProWithMemo
                | Version::VisualFoxProWithVarchar
        )
    }

    pub fn is_dbase3_with_memo(&self) -> bool {
        matches!(self, Version::DBase3WithMemo)
    }

    pub fn is_dbase2(&self) -> bool {
        matches!(self, Version::DBase2)
    }
}

/// The decoded 32-byte (or, for dBASE II, reconstructed) table header.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: Version,
    pub last_updated: Option<NaiveDate>,
    pub n_records: u64,
    pub n_header_bytes: usize,
    pub n_record_bytes: usize,
    pub mdx_flag: u8,
    pub language_driver_id: u8,
}

fn y2k(year_byte: u8) -> u16 {
    if year_byte < 80 {
        2000 + year_byte as u16
    } else {
        1900 + year_byte as u16
    }
}

impl Header {
    /// Parse the fixed 32-byte header. `data` must be at least 32 bytes long.
    ///
    /// For dBASE II files (`version == 0x02`) the layout differs: the record
    /// count lives in a single byte at offset 1, the record length is a u16 LE
    /// at offset 6, there is no last-updated date, and `n_header_bytes` is not
    /// stored — it must be reconstructed by the caller once the field count is
    /// known, via [`Header::finish_dbase2`].
    pub fn from_bytes(data: &[u8]) -> DbfResult<Self> {
        if data.is_empty() {
            return Err(crate::error::Error::InvalidHeader {
                reason: "empty header".to_string(),
            });
        }

        let version_byte = data[0];
        if version_byte == DBASE2_VERSION {
            if data.len() < 8 {
                return Err(crate::error::Error::InvalidHeader {
                    reason: format!("dBASE II header requires 8 bytes, got {}", data.len()),
                });
            }
            return Ok(Self::from_dbase2_bytes(data));
        }

        if data.len() < 32 {
            return Err(crate::error::Error::InvalidHeader {
                reason: format!("header requires 32 bytes, got {}", data.len()),
            });
        }

        let view = dbase_header::View::new(&data[..32]);
        let version = Version::from_byte(version_byte);
        if matches!(version, Version::Unknown(_)) {
            warn!("unrecognized dBASE version byte 0x{:02x}, proceeding in permissive mode", version_byte);
        }

        let year = view.last_updated().year().read();
        let month = view.last_updated().month().read();
        let day = view.last_updated().day().read();
        let last_updated = if year == 0 && month == 0 && day == 0 {
            None
        } else {
            NaiveDate::from_ymd_opt(y2k(year) as i32, month as u32, day as u32)
        };

        let mut n_header_bytes = view.n_header_bytes().read() as usize;
        if n_header_bytes == 0 {
            warn!("header declares n_header_bytes == 0, assuming the minimal 33 bytes");
            n_header_bytes = 33;
        }

        let mut n_record_bytes = view.n_record_bytes().read() as usize;
        if n_record_bytes == 0 {
            warn!("header declares n_record_bytes == 0, assuming 1 byte (status byte only)");
            n_record_bytes = 1;
        }

        Ok(Header {
            version,
            last_updated,
            n_records: view.n_records().read() as u64,
            n_header_bytes,
            n_record_bytes,
            mdx_flag: view.mdx_flag().read(),
            language_driver_id: view.language_driver_id().read(),
        })
    }

    fn from_dbase2_bytes(data: &[u8]) -> Self {
        let n_records = data[1] as u64;
        let n_record_bytes = u16::from_le_bytes([data[6], data[7]]) as usize;
        Header {
            version: Version::DBase2,
            last_updated: None,
            n_records,
            // Reconstructed once the descriptor table has been walked; see
            // `finish_dbase2`. Zero is a placeholder, never read as final.
            n_header_bytes: 0,
            n_record_bytes,
            mdx_flag: 0,
            language_driver_id: 0,
        }
    }

    /// Reconstruct `n_header_bytes` for a dBASE II header once `field_count`
    /// has been determined by walking the 16-byte descriptor array: the
    /// header is 8 fixed bytes plus 16 bytes per field (no terminator byte in
    /// this dialect).
    pub fn finish_dbase2(&mut self, field_count: usize) {
        debug_assert!(self.version.is_dbase2());
        self.n_header_bytes = 8 + field_count * 16;
    }

    pub fn language_driver_byte(&self) -> u8 {
        self.language_driver_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header_bytes() -> Vec<u8> {
        let mut data = vec![0u8; 32];
        let mut view = dbase_header::View::new(&mut data[..]);
        view.version_mut().write(0x83);
        view.last_updated_mut().year_mut().write(24);
        view.last_updated_mut().month_mut().write(6);
        view.last_updated_mut().day_mut().write(1);
        view.n_records_mut().write(3);
        view.n_header_bytes_mut().write(33 + 32);
        view.n_record_bytes_mut().write(21);
        view.language_driver_id_mut().write(0x03);
        data
    }

    #[test]
    fn parses_dbase3_with_memo_header() {
        let data = base_header_bytes();
        let header = Header::from_bytes(&data).unwrap();
        assert_eq!(header.version, Version::DBase3WithMemo);
        assert!(header.version.supports_memo());
        assert_eq!(header.n_records, 3);
        assert_eq!(header.n_header_bytes, 65);
        assert_eq!(header.n_record_bytes, 21);
        assert_eq!(header.last_updated, NaiveDate::from_ymd_opt(2024, 6, 1));
    }

    #[test]
    fn y2k_boundary() {
        assert_eq!(y2k(0), 2000);
        assert_eq!(y2k(79), 2079);
        assert_eq!(y2k(80), 1980);
        assert_eq!(y2k(99), 1999);
    }

    #[test]
    fn zero_lengths_are_recovered_with_warning() {
        let mut data = base_header_bytes();
        let mut view = dbase_header::View::new(&mut data[..]);
        view.n_header_bytes_mut().write(0);
        view.n_record_bytes_mut().write(0);
        let header = Header::from_bytes(&data).unwrap();
        assert_eq!(header.n_header_bytes, 33);
        assert_eq!(header.n_record_bytes, 1);
    }

    #[test]
    fn short_read_is_invalid_header() {
        let data = vec![0u8; 16];
        assert!(Header::from_bytes(&data).is_err());
    }

    #[test]
    fn dbase2_header_reconstructs_field_count() {
        let mut data = vec![0u8; 8];
        data[0] = 0x02;
        data[1] = 9;
        data[6..8].copy_from_slice(&127u16.to_le_bytes());
        let mut header = Header::from_bytes(&data).unwrap();
        assert_eq!(header.n_records, 9);
        assert_eq!(header.n_record_bytes, 127);
        header.finish_dbase2(14);
        assert_eq!(header.n_header_bytes, 8 + 14 * 16);
    }
}
