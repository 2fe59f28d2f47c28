//! Maps the header's 1-byte language-driver code (plus an optional caller
//! override) to a text encoding.

use log::warn;

/// A resolved text encoding. With the `encoding` feature this wraps a real
/// `encoding_rs::Encoding`; without it, every table is decoded as UTF-8 with
/// replacement, which is also the fallback this module uses when an override
/// or language-driver byte cannot be resolved.
#[derive(Clone, Copy)]
pub struct CodePage {
    #[cfg(feature = "encoding")]
    inner: &'static encoding_rs::Encoding,
    /// Set when an explicit override named an encoding this crate could not
    /// resolve; the reader falls back to UTF-8-with-replacement and a
    /// warning is already emitted at resolution time.
    valid: bool,
}

impl std::fmt::Debug for CodePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodePage").field("valid", &self.valid).finish()
    }
}

impl CodePage {
    #[cfg(feature = "encoding")]
    fn from_encoding(inner: &'static encoding_rs::Encoding) -> Self {
        CodePage { inner, valid: true }
    }

    fn fallback_invalid() -> Self {
        CodePage {
            #[cfg(feature = "encoding")]
            inner: encoding_rs::UTF_8,
            valid: false,
        }
    }

    #[cfg(not(feature = "encoding"))]
    fn fallback_invalid_marker() -> Self {
        CodePage { valid: false }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The resolved encoding's canonical name (e.g. `"windows-1252"`), or
    /// `"UTF-8"` when the `encoding` feature is disabled.
    pub fn name(&self) -> &'static str {
        #[cfg(feature = "encoding")]
        {
            self.inner.name()
        }
        #[cfg(not(feature = "encoding"))]
        {
            "UTF-8"
        }
    }

    /// Decode `bytes` through this encoding. Decode errors are replaced with
    /// U+FFFD unless `fallback` provides a different substitute character.
    pub fn decode(&self, bytes: &[u8], fallback: Option<char>) -> String {
        #[cfg(feature = "encoding")]
        {
            let (cow, _, had_errors) = self.inner.decode(bytes);
            if had_errors {
                if let Some(sub) = fallback {
                    return cow.chars().map(|c| if c == '\u{FFFD}' { sub } else { c }).collect();
                }
            }
            cow.into_owned()
        }
        #[cfg(not(feature = "encoding"))]
        {
            let _ = fallback;
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Map a language-driver byte to a Windows codepage number, per the selected
/// pairs this crate supports. Unknown bytes fall back to Latin-1 (1252).
fn windows_codepage_for_language_driver(byte: u8) -> u16 {
    match byte {
        0x00 => 1252, // treated as ASCII-compatible
        0x01 => 437,
        0x02 => 850,
        0x03 => 1252,
        0x57 => 1252,
        0x64 => 852,
        0xC8 => 1250,
        0xC9 => 1251,
        _ => 1252,
    }
}

/// Resolve the encoding to use for a table: an explicit caller override wins;
/// otherwise the header's language-driver byte is mapped via the table
/// above, through the `codepage` crate's Windows-codepage-to-encoding table.
pub fn resolve(language_driver: u8, override_name: Option<&str>) -> CodePage {
    #[cfg(feature = "encoding")]
    {
        if let Some(name) = override_name {
            if let Some(enc) = encoding_rs::Encoding::for_label(name.as_bytes()) {
                return CodePage::from_encoding(enc);
            }
            warn!("unknown encoding override {name:?}, falling back to UTF-8 with replacement");
            return CodePage::fallback_invalid();
        }

        let cp_number = windows_codepage_for_language_driver(language_driver);
        match codepage::to_encoding(cp_number) {
            Some(enc) => CodePage::from_encoding(enc),
            None => {
                warn!("no known encoding for Windows codepage {cp_number}, falling back to UTF-8");
                CodePage::fallback_invalid()
            }
        }
    }
    #[cfg(not(feature = "encoding"))]
    {
        if let Some(name) = override_name {
            warn!("encoding override {name:?} requested but the `encoding` feature is disabled");
        }
        CodePage::fallback_invalid_marker()
    }
}
