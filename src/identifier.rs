use std::fmt;

use uuid::Uuid;

/// Length of a hyphenated UUID in its textual form.
const CANONICAL_LEN: usize = 36;

/// The single join key between an uploaded image and its narration.
///
/// Always rendered in canonical lowercase hyphenated form which makes it
/// safe to use directly as a file name segment.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Mints a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a caller supplied identifier.
    ///
    /// Only the exact canonical form produced by `Display` is accepted,
    /// anything else (other uuid encodings included) yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != CANONICAL_LEN {
            return None;
        }

        let valid_chars = raw.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_digit() || (b'a'..=b'f').contains(&b),
        });

        if !valid_chars {
            return None;
        }

        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
