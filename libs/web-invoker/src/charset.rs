//! Character sets understood when encoding request bodies and decoding
//! response content.

use std::borrow::Cow;
use std::fmt;

/// Replacement byte for characters a single-byte charset cannot represent
const UNMAPPABLE: u8 = b'?';

/// A supported character set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    /// UTF-8
    Utf8,
    /// ISO-8859-1 (Latin-1), the default for URL-encoded forms
    Iso8859_1,
    /// US-ASCII
    UsAscii,
}

impl Charset {
    /// Look up a charset by its IANA name or a common alias.
    ///
    /// Returns `None` for charsets this crate cannot encode or decode.
    #[must_use]
    pub fn for_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_matches('"');
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "iso8859_1" | "latin1" | "l1" => {
                Some(Self::Iso8859_1)
            }
            "us-ascii" | "ascii" | "us_ascii" => Some(Self::UsAscii),
            _ => None,
        }
    }

    /// Canonical IANA name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Iso8859_1 => "ISO-8859-1",
            Self::UsAscii => "US-ASCII",
        }
    }

    /// Encode text, replacing unmappable characters with `?`.
    #[must_use]
    pub fn encode<'a>(self, text: &'a str) -> Cow<'a, [u8]> {
        let limit = match self {
            Self::Utf8 => return Cow::Borrowed(text.as_bytes()),
            Self::Iso8859_1 => 0xFF,
            Self::UsAscii => 0x7F,
        };
        if text.is_ascii() {
            return Cow::Borrowed(text.as_bytes());
        }
        Cow::Owned(
            text.chars()
                .map(|c| u8::try_from(u32::from(c)).ok().filter(|b| u32::from(*b) <= limit))
                .map(|b| b.unwrap_or(UNMAPPABLE))
                .collect(),
        )
    }

    /// Decode bytes, replacing malformed sequences with U+FFFD.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Iso8859_1 => bytes.iter().copied().map(char::from).collect(),
            Self::UsAscii => bytes
                .iter()
                .map(|b| {
                    if b.is_ascii() {
                        char::from(*b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
