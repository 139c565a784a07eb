//! Chunk extraction: raw metadata text out of PNG and JPEG containers.
//!
//! | Container | Where the text lives |
//! |---|---|
//! | **PNG** | `tEXt`, `iTXt` and `zTXt` chunks, keyed by chunk keyword |
//! | **JPEG** | EXIF `UserComment` / `ImageDescription`, XMP `parameters` / `dc:description` |
//!
//! The container is detected by signature, never by file extension. Only
//! fragments whose keyword belongs to the fixed vocabulary of [`FragmentKey`]
//! survive; everything else in the file is ignored.
//!
//! Nothing here returns an error. A truncated chunk table or a broken EXIF
//! block just ends the walk early and whatever was found before it is kept.

mod jpeg;
mod png;

use std::collections::BTreeMap;
use std::fmt;

pub use png::PNG_SIGNATURE;

/// JPEG start-of-image marker.
pub const JPEG_SIGNATURE: [u8; 2] = [0xFF, 0xD8];

/// Keywords a generation tool may embed its metadata under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FragmentKey {
    InvokeAiMetadata,
    Parameters,
    Workflow,
    Prompt,
    Description,
}

impl FragmentKey {
    pub const ALL: [FragmentKey; 5] = [
        FragmentKey::InvokeAiMetadata,
        FragmentKey::Parameters,
        FragmentKey::Workflow,
        FragmentKey::Prompt,
        FragmentKey::Description,
    ];

    /// Map a container keyword onto the vocabulary. Case-insensitive, so
    /// `Parameters` and `parameters` are the same fragment.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(keyword.trim()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKey::InvokeAiMetadata => "invokeai_metadata",
            FragmentKey::Parameters => "parameters",
            FragmentKey::Workflow => "workflow",
            FragmentKey::Prompt => "prompt",
            FragmentKey::Description => "description",
        }
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw text fragments found in one file. Produced per file, never persisted.
pub type RawFragmentMap = BTreeMap<FragmentKey, String>;

/// Stop walking a container once this many recognized fragments are found.
const MAX_RECOGNIZED_FRAGMENTS: usize = FragmentKey::ALL.len();

/// Pull metadata fragments out of an image buffer.
///
/// Returns `None` for unknown signatures and for containers that carry no
/// recognized fragment.
pub fn extract(data: &[u8]) -> Option<RawFragmentMap> {
    let fragments = if data.starts_with(&PNG_SIGNATURE) {
        png::read_png_fragments(data)
    } else if data.starts_with(&JPEG_SIGNATURE) {
        jpeg::read_jpeg_fragments(data)
    } else {
        return None;
    };

    if fragments.is_empty() {
        None
    } else {
        Some(fragments)
    }
}

/// Insert a fragment unless the key is already taken. The first occurrence
/// in file order wins.
fn insert_fragment(fragments: &mut RawFragmentMap, keyword: &str, text: String) {
    let Some(key) = FragmentKey::from_keyword(keyword) else {
        return;
    };
    if text.trim().is_empty() {
        return;
    }
    fragments.entry(key).or_insert(text);
}

/// Decode text bytes: UTF-8 when valid, Latin-1 otherwise (the charset
/// `tEXt` chunks are specified in).
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
