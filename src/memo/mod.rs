//! The memo subsystem (C5): three sidecar sub-readers, a null-memo
//! fallback, and a factory that picks one from the table's version and the
//! sidecar files present next to it.

mod db3;
mod db4;
mod null;
mod vfp;

use std::path::{Path, PathBuf};

use crate::error::{DbfResult, Error};
use crate::header::Version;
use crate::value::MemoSource;

pub use db3::Db3MemoReader;
pub use db4::Db4MemoReader;
pub use null::NullMemoReader;
pub use vfp::VfpMemoReader;

/// Raw bytes read from a memo block, tagged by the sub-format's notion of
/// content type. DB3 and DB4 sidecars carry no typing of their own, so every
/// memo they produce is `Text`.
#[derive(Debug, Clone)]
pub enum MemoPayload {
    Text(Vec<u8>),
    Picture(Vec<u8>),
    Object(Vec<u8>),
    Binary(Vec<u8>),
}

/// Options the memo factory and sub-readers consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoOptions {
    pub ignore_missing_memo: bool,
    pub validate_fields: bool,
}

/// The polymorphic memo backend, dispatching to whichever sub-reader the
/// factory selected.
pub enum MemoBackend {
    Db3(Db3MemoReader),
    Db4(Db4MemoReader),
    Vfp(VfpMemoReader),
    Null(NullMemoReader),
}

impl MemoSource for MemoBackend {
    fn lookup(&self, index: u32) -> DbfResult<Option<MemoPayload>> {
        match self {
            MemoBackend::Db3(r) => r.lookup(index),
            MemoBackend::Db4(r) => r.lookup(index),
            MemoBackend::Vfp(r) => r.lookup(index),
            MemoBackend::Null(r) => r.lookup(index),
        }
    }
}

/// Candidate sidecar extensions, tried case-insensitively in this order.
const SIDECAR_EXTENSIONS: [&str; 2] = ["fpt", "dbt"];

/// Locate a memo sidecar next to `dbf_path` by matching file stem, trying
/// `.fpt` before `.dbt`, case-insensitively.
pub fn find_sidecar(dbf_path: &Path) -> Option<PathBuf> {
    let dir = dbf_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = dbf_path.file_stem()?;

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_stem() != Some(stem) {
            continue;
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let ext_lower = ext.to_ascii_lowercase();
            if SIDECAR_EXTENSIONS.contains(&ext_lower.as_str()) {
                return Some(path);
            }
        }
    }
    None
}

fn expected_memo_path(dbf_path: &Path, version: Version) -> PathBuf {
    let ext = if version.is_visual_foxpro() { "fpt" } else { "dbt" };
    dbf_path.with_extension(ext)
}

/// Open (or synthesize) the memo backend for a table at `dbf_path` whose
/// header declared `version`.
pub fn open(dbf_path: &Path, version: Version, options: MemoOptions) -> DbfResult<MemoBackend> {
    if !version.supports_memo() {
        return Ok(MemoBackend::Null(NullMemoReader));
    }

    let sidecar = find_sidecar(dbf_path);
    let sidecar = match sidecar {
        Some(path) => path,
        None => {
            if options.ignore_missing_memo {
                return Ok(MemoBackend::Null(NullMemoReader));
            }
            return Err(Error::MissingMemoFile {
                dbf_path: dbf_path.to_path_buf(),
                expected_memo_path: expected_memo_path(dbf_path, version),
            });
        }
    };

    let is_fpt = sidecar
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("fpt"))
        .unwrap_or(false);

    if version.is_visual_foxpro() || is_fpt {
        Ok(MemoBackend::Vfp(VfpMemoReader::open(&sidecar, options)?))
    } else if version.is_dbase3_with_memo() {
        Ok(MemoBackend::Db3(Db3MemoReader::open(&sidecar)?))
    } else {
        Ok(MemoBackend::Db4(Db4MemoReader::open(&sidecar, options)?))
    }
}
