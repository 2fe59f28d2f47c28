use std::io::Write;

use tempfile::{tempdir, NamedTempFile};

use xbase_table::{Error, Reader, ReaderOptions, Value};

fn field_descriptor(name: &str, f_type: u8, length: u8, decimal_count: u8) -> [u8; 32] {
    let mut data = [0u8; 32];
    data[..name.len()].copy_from_slice(name.as_bytes());
    data[11] = f_type;
    data[16] = length;
    data[17] = decimal_count;
    data
}

fn dbase3_header(n_records: u32, header_len: u16, record_len: u16, language_driver: u8) -> [u8; 32] {
    let mut data = [0u8; 32];
    data[0] = 0x83; // dBASE III with memo
    data[4..8].copy_from_slice(&n_records.to_le_bytes());
    data[8..10].copy_from_slice(&header_len.to_le_bytes());
    data[10..12].copy_from_slice(&record_len.to_le_bytes());
    data[29] = language_driver;
    data
}

/// A two-field (NAME, AGE) table with one active and one deleted record.
#[test]
fn two_row_people_file_with_one_deleted_record() {
    let fields = [
        &field_descriptor("NAME", b'C', 10, 0)[..],
        &field_descriptor("AGE", b'N', 3, 0)[..],
    ]
    .concat();
    let header_len = 32 + fields.len() + 1;
    let record_len = 1 + 10 + 3;

    let mut header = vec![0u8; 32];
    header[0] = 0x03; // FoxBase/dBASE III, no memo
    header[4..8].copy_from_slice(&2u32.to_le_bytes());
    header[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    header[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());
    header[29] = 0x03;

    let mut data = header;
    data.extend_from_slice(&fields);
    data.push(0x0D);
    data.push(0x20);
    data.extend_from_slice(b"Alice     ");
    data.extend_from_slice(b" 30");
    data.push(0x2A);
    data.extend_from_slice(b"Bob       ");
    data.extend_from_slice(b" 25");
    data.push(0x1A);

    let mut f = NamedTempFile::with_suffix(".dbf").unwrap();
    f.write_all(&data).unwrap();

    let mut reader = Reader::open(f.path(), ReaderOptions::default()).unwrap();
    let records: Vec<_> = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_string("NAME").unwrap().as_deref(), Some("Alice"));

    let stats = reader.stats();
    assert_eq!(stats.active_records, 1);
    assert_eq!(stats.deleted_records, 1);
    assert_eq!(stats.total_records, 2);
}

/// A Visual FoxPro table with a Character field and a memo, backed by an
/// .fpt sidecar carrying a text block.
#[test]
fn visual_foxpro_table_with_memo() {
    let dir = tempdir().unwrap();
    let dbf_path = dir.path().join("notes.dbf");
    let fpt_path = dir.path().join("notes.fpt");

    let fields = [
        &field_descriptor("NAME", b'C', 10, 0)[..],
        &field_descriptor("NOTES", b'M', 4, 0)[..],
    ]
    .concat();
    let header_len = 32 + fields.len() + 1;
    let record_len = 1 + 10 + 4;

    let mut header = vec![0u8; 32];
    header[0] = 0x32; // Visual FoxPro with memo
    header[4..8].copy_from_slice(&1u32.to_le_bytes());
    header[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    header[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());
    header[29] = 0x03;

    let mut data = header;
    data.extend_from_slice(&fields);
    data.push(0x0D);
    data.push(0x20);
    data.extend_from_slice(b"Carol     ");
    data.extend_from_slice(b"   1");
    data.push(0x1A);
    std::fs::write(&dbf_path, &data).unwrap();

    let block_size: u16 = 64;
    let mut fpt = vec![0u8; 512];
    fpt[0..4].copy_from_slice(&2u32.to_be_bytes());
    fpt[6..8].copy_from_slice(&block_size.to_be_bytes());
    let text = b"hello from the memo field";
    let mut block1 = vec![0u8; block_size as usize];
    block1[0..4].copy_from_slice(&1u32.to_be_bytes()); // type: text
    block1[4..8].copy_from_slice(&(text.len() as u32).to_be_bytes());
    block1[8..8 + text.len()].copy_from_slice(text);
    // Block index 1 lives at absolute offset 1 * block_size, inside the
    // nominal 512-byte file header region for this small block size.
    let start = block_size as usize;
    if fpt.len() < start + block1.len() {
        fpt.resize(start + block1.len(), 0);
    }
    fpt[start..start + block1.len()].copy_from_slice(&block1);
    std::fs::write(&fpt_path, &fpt).unwrap();

    let mut reader = Reader::open(&dbf_path, ReaderOptions::default()).unwrap();
    let records: Vec<_> = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 1);
    match records[0].get_by_name("NOTES").unwrap() {
        Value::Memo(Some(xbase_table::MemoValue::Text(t))) => assert_eq!(t, "hello from the memo field"),
        other => panic!("expected text memo, got {other:?}"),
    }
}

/// A chunked memory-mapped read and a streaming read of the same file agree
/// byte-for-byte, including across an induced chunk boundary.
#[test]
fn chunked_mapped_read_matches_stream_read() {
    let fields = [&field_descriptor("NAME", b'C', 20, 0)[..]].concat();
    let header_len = 32 + fields.len() + 1;
    let record_len = 1 + 20;
    let n_records = 50u32;

    let mut header = dbase3_header(n_records, header_len as u16, record_len as u16, 0x03);
    header[0] = 0x03;
    let mut data = header.to_vec();
    data.extend_from_slice(&fields);
    data.push(0x0D);
    for i in 0..n_records {
        data.push(0x20);
        let row = format!("row-{i:0>16}");
        data.extend_from_slice(row.as_bytes());
    }
    data.push(0x1A);

    let mut f = NamedTempFile::with_suffix(".dbf").unwrap();
    f.write_all(&data).unwrap();

    let mut stream_reader = Reader::open(f.path(), ReaderOptions::default()).unwrap();
    let stream_names: Vec<_> = stream_reader
        .records()
        .map(|r| r.unwrap().get_string("NAME").unwrap().unwrap())
        .collect();

    // Force a chunk boundary well inside the record data.
    let mapped_options = ReaderOptions::default().with_memory_mapping(true).with_mmap_chunk_size(64);
    let mut mapped_reader = Reader::open(f.path(), mapped_options).unwrap();
    let mapped_names: Vec<_> = mapped_reader
        .records()
        .map(|r| r.unwrap().get_string("NAME").unwrap().unwrap())
        .collect();

    assert_eq!(stream_names.len(), n_records as usize);
    assert_eq!(stream_names, mapped_names);
}

/// An invalid calendar date becomes `Value::Invalid` when not validating,
/// and raises `Error::FieldParseError` when `validate_fields` is set.
#[test]
fn invalid_date_behavior_under_both_modes() {
    let fields = [&field_descriptor("DOB", b'D', 8, 0)[..]].concat();
    let header_len = 32 + fields.len() + 1;
    let record_len = 1 + 8;

    let mut header = vec![0u8; 32];
    header[0] = 0x03;
    header[4..8].copy_from_slice(&1u32.to_le_bytes());
    header[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    header[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());

    let mut data = header;
    data.extend_from_slice(&fields);
    data.push(0x0D);
    data.push(0x20);
    data.extend_from_slice(b"20241301"); // month 13 does not exist
    data.push(0x1A);

    let mut f = NamedTempFile::with_suffix(".dbf").unwrap();
    f.write_all(&data).unwrap();

    let mut lenient = Reader::open(f.path(), ReaderOptions::default()).unwrap();
    let records = lenient.records().collect::<Result<Vec<_>, _>>().unwrap();
    assert!(records[0].get_by_name("DOB").unwrap().is_invalid());

    let mut strict = Reader::open(f.path(), ReaderOptions::default().with_validate_fields(true)).unwrap();
    let strict_records = strict.records().collect::<Result<Vec<_>, _>>().unwrap();
    let err = strict_records[0].get_by_name("DOB").unwrap_err();
    assert!(matches!(err, Error::FieldParseError { .. }));
}

/// A missing memo sidecar is fatal at construction unless
/// `ignore_missing_memo` is set.
#[test]
fn missing_memo_sidecar_is_fatal_unless_ignored() {
    let dir = tempdir().unwrap();
    let dbf_path = dir.path().join("orphan.dbf");

    let fields = [
        &field_descriptor("NAME", b'C', 10, 0)[..],
        &field_descriptor("NOTES", b'M', 4, 0)[..],
    ]
    .concat();
    let header_len = 32 + fields.len() + 1;
    let record_len = 1 + 10 + 4;

    let mut header = vec![0u8; 32];
    header[0] = 0x83; // dBASE III with memo, but no .dbt alongside it
    header[4..8].copy_from_slice(&0u32.to_le_bytes());
    header[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    header[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());

    let mut data = header;
    data.extend_from_slice(&fields);
    data.push(0x0D);
    data.push(0x1A);
    std::fs::write(&dbf_path, &data).unwrap();

    let err = Reader::open(&dbf_path, ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MissingMemoFile { .. }));

    let reader = Reader::open(&dbf_path, ReaderOptions::default().with_ignore_missing_memo(true));
    assert!(reader.is_ok());
}

/// A dBASE II header (8-byte fixed header, 16-byte descriptors, no stored
/// header length) recovers its field count and decodes records correctly.
#[test]
fn dbase2_header_recovers_field_count_and_records() {
    let mut field1 = [0u8; 16];
    field1[0..4].copy_from_slice(b"NAME");
    field1[11] = b'C';
    field1[12] = 10;
    let mut field2 = [0u8; 16];
    field2[0..4].copy_from_slice(b"AGE");
    field2[11] = b'N';
    field2[12] = 3;

    let record_len = 1 + 10 + 3;
    let mut data = vec![0u8; 8];
    data[0] = 0x02;
    data[1] = 1; // n_records
    data[6..8].copy_from_slice(&(record_len as u16).to_le_bytes());
    data.extend_from_slice(&field1);
    data.extend_from_slice(&field2);
    data.push(0x20);
    data.extend_from_slice(b"Dana      ");
    data.extend_from_slice(b" 45");
    data.push(0x1A);

    let mut f = NamedTempFile::with_suffix(".dbf").unwrap();
    f.write_all(&data).unwrap();

    let mut reader = Reader::open(f.path(), ReaderOptions::default()).unwrap();
    let stats = reader.stats();
    assert_eq!(stats.field_count, 2);
    assert_eq!(stats.header_length, 8 + 2 * 16);

    let records: Vec<_> = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_string("NAME").unwrap().as_deref(), Some("Dana"));
    assert_eq!(records[0].get_integer("AGE").unwrap(), Some(45));
}
