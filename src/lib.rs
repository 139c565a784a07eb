//! # promptvault
//!
//! Metadata extraction and incremental indexing for local collections of
//! AI-generated images. Generation tools embed their parameters (prompt,
//! models, LoRAs, sampler settings) inside the PNG or JPEG they write, each in
//! its own dialect. promptvault reads them back into one canonical record and
//! keeps a per-directory index that only re-parses files that changed.
//!
//! # Architecture: Per-File Pipeline + Incremental Index
//!
//! ```text
//! bytes ─extract─▶ fragments ─resolve─▶ Dialect ─normalize─▶ NormalizedRecord
//!
//! listing ─diff(snapshot)─▶ unchanged / to_process / deleted
//!                                 │ batches, parallel parse
//!                                 ▼
//!                          RootSnapshot ─replace─▶ snapshot store ─▶ query
//! ```
//!
//! Every stage of the per-file pipeline degrades instead of failing: an
//! unknown container, a malformed JSON fragment or an unusable graph all end
//! in an empty record, and the file is still indexed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`extract`] | Raw text fragments out of PNG chunks and JPEG EXIF/XMP |
//! | [`dialect`] | Picks one of ComfyUI / InvokeAI / Automatic1111 per file |
//! | [`normalize`] | Dialect-specific field extraction into [`normalize::NormalizedRecord`] |
//! | [`parse`] | The three stages above composed, per file |
//! | [`index`] | `IndexEntry`, `RootSnapshot` and the listing diff |
//! | [`source`] | Directory listing and byte-read contracts, filesystem implementation |
//! | [`store`] | Persisted snapshot store: atomic JSON files, or in memory |
//! | [`control`] | Pause / resume / cancel state machine for one root |
//! | [`engine`] | Batched, parallel, per-root indexing runs with progress events |
//! | [`query`] | Text, facet, range and date filters over committed snapshots |
//! | [`config`] | `promptvault.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Modification Time Is the Only Change Signal
//!
//! A file whose `last_modified` matches its stored entry is never read. No
//! content hashing: on collections of tens of thousands of images, reading
//! every file just to prove it is unchanged costs more than the parse it saves.
//!
//! ## Dialects as a Closed Enum
//!
//! [`dialect::Dialect`] is a tagged enum and [`normalize::normalize`] matches
//! it exhaustively. A new generation tool is a new variant, and the compiler
//! points at every place that has to learn about it.
//!
//! ## Session-Scoped Board Labels
//!
//! InvokeAI may record a board only by opaque id. Those ids get synthetic
//! `My Board N` labels from a [`normalize::BoardRegistry`] owned by the
//! engine, not a global. Labels are stable for one session only.

pub mod config;
pub mod control;
pub mod dialect;
pub mod engine;
pub mod extract;
pub mod index;
pub mod normalize;
pub mod output;
pub mod parse;
pub mod query;
pub mod source;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
