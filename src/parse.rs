//! Per-file parsing: bytes in, [`NormalizedRecord`] out.
//!
//! ```text
//! bytes ──extract──▶ RawFragmentMap ──resolve──▶ Dialect ──normalize──▶ NormalizedRecord
//! ```
//!
//! Each stage may come up empty: unknown signature, no recognized fragment,
//! no usable dialect. Every such case ends in the default record, so the
//! file is still indexed, just without searchable metadata.

use crate::dialect::{self, Dialect};
use crate::extract::{self, RawFragmentMap};
use crate::normalize::{self, BoardRegistry, NormalizedRecord};

/// Parse one image buffer.
pub fn parse_image(data: &[u8], boards: &BoardRegistry) -> NormalizedRecord {
    extract::extract(data)
        .and_then(|fragments| dialect::resolve(&fragments))
        .map(|dialect| normalize::normalize(&dialect, boards))
        .unwrap_or_default()
}

/// Every intermediate stage of [`parse_image`], for diagnostics.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub fragments: Option<RawFragmentMap>,
    pub dialect: Option<Dialect>,
    pub record: NormalizedRecord,
}

pub fn inspect_image(data: &[u8], boards: &BoardRegistry) -> Inspection {
    let fragments = extract::extract(data);
    let dialect = fragments.as_ref().and_then(dialect::resolve);
    let record = dialect
        .as_ref()
        .map(|d| normalize::normalize(d, boards))
        .unwrap_or_default();
    Inspection {
        fragments,
        dialect,
        record,
    }
}
