//! Shared test utilities for the promptvault test suite.
//!
//! Byte-level fixture builders for the containers the extractor understands,
//! plus an in-memory [`ImageSource`] that records reads.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let png = png_with_chunks(&[text_chunk("parameters", "A cat\nSteps: 20")]);
//! let source = MemorySource::new().with_file("/root", "a.png", 1_000, png);
//! ```

use crate::source::{FileStamp, ImageSource, SourceError};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// =========================================================================
// PNG
// =========================================================================

/// One raw chunk. The CRC is left zeroed; the extractor never checks it.
pub fn png_chunk(kind: &[u8], body: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(body.len() + 12);
    chunk.extend_from_slice(&(body.len() as u32).to_be_bytes());
    chunk.extend_from_slice(kind);
    chunk.extend_from_slice(body);
    chunk.extend_from_slice(&[0, 0, 0, 0]);
    chunk
}

pub fn text_chunk(keyword: &str, text: &str) -> Vec<u8> {
    let mut body = keyword.as_bytes().to_vec();
    body.push(0);
    body.extend_from_slice(text.as_bytes());
    png_chunk(b"tEXt", &body)
}

pub fn itxt_chunk(keyword: &str, text: &str, compressed: bool) -> Vec<u8> {
    let mut body = keyword.as_bytes().to_vec();
    body.push(0);
    body.push(u8::from(compressed));
    body.push(0);
    body.push(0); // empty language tag
    body.push(0); // empty translated keyword
    if compressed {
        body.extend_from_slice(&zlib(text.as_bytes()));
    } else {
        body.extend_from_slice(text.as_bytes());
    }
    png_chunk(b"iTXt", &body)
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Signature + 1x1 IHDR + the given chunks + IEND.
pub fn png_with_chunks(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut png = crate::extract::PNG_SIGNATURE.to_vec();
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&1u32.to_be_bytes());
    ihdr.extend_from_slice(&1u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    png.extend_from_slice(&png_chunk(b"IHDR", &ihdr));
    for chunk in chunks {
        png.extend_from_slice(chunk);
    }
    png.extend_from_slice(&png_chunk(b"IEND", &[]));
    png
}

/// PNG carrying a single `parameters` text chunk.
pub fn a1111_png(parameters: &str) -> Vec<u8> {
    png_with_chunks(&[text_chunk("parameters", parameters)])
}

// =========================================================================
// JPEG / TIFF
// =========================================================================

/// SOI + one marker segment per entry + EOI.
pub fn jpeg_with_segments(segments: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut jpeg = vec![0xFF, 0xD8];
    for (marker, payload) in segments {
        jpeg.push(0xFF);
        jpeg.push(*marker);
        jpeg.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        jpeg.extend_from_slice(payload);
    }
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

/// JPEG with an EXIF APP1 segment holding `comment` as UserComment.
pub fn jpeg_with_user_comment(comment: &[u8]) -> Vec<u8> {
    let mut segment = b"Exif\0\0".to_vec();
    segment.extend_from_slice(&tiff_with_user_comment(comment));
    jpeg_with_segments(&[(0xE1, segment)])
}

fn ifd_entry(tiff: &mut Vec<u8>, tag: u16, typ: u16, count: u32, value: u32) {
    tiff.extend_from_slice(&tag.to_be_bytes());
    tiff.extend_from_slice(&typ.to_be_bytes());
    tiff.extend_from_slice(&count.to_be_bytes());
    tiff.extend_from_slice(&value.to_be_bytes());
}

/// Big-endian TIFF: IFD0 → Exif IFD pointer → UserComment (UNDEFINED).
pub fn tiff_with_user_comment(comment: &[u8]) -> Vec<u8> {
    let mut tiff = b"MM\0\x2a".to_vec();
    tiff.extend_from_slice(&8u32.to_be_bytes());
    // IFD0 at 8: one entry, then next-IFD = 0
    let exif_ifd = 8 + 2 + 12 + 4;
    tiff.extend_from_slice(&1u16.to_be_bytes());
    ifd_entry(&mut tiff, 0x8769, 4, 1, exif_ifd);
    tiff.extend_from_slice(&0u32.to_be_bytes());
    // Exif IFD: one entry, then next-IFD = 0, then the comment bytes
    let data_offset = exif_ifd + 2 + 12 + 4;
    tiff.extend_from_slice(&1u16.to_be_bytes());
    ifd_entry(&mut tiff, 0x9286, 7, comment.len() as u32, data_offset);
    tiff.extend_from_slice(&0u32.to_be_bytes());
    tiff.extend_from_slice(comment);
    tiff
}

/// Big-endian TIFF with a NUL-terminated ImageDescription in IFD0.
pub fn tiff_with_description(text: &str) -> Vec<u8> {
    let mut tiff = b"MM\0\x2a".to_vec();
    tiff.extend_from_slice(&8u32.to_be_bytes());
    let data_offset = 8 + 2 + 12 + 4;
    let mut data = text.as_bytes().to_vec();
    data.push(0);
    tiff.extend_from_slice(&1u16.to_be_bytes());
    ifd_entry(&mut tiff, 0x010E, 2, data.len() as u32, data_offset);
    tiff.extend_from_slice(&0u32.to_be_bytes());
    tiff.extend_from_slice(&data);
    tiff
}

// =========================================================================
// In-memory image source
// =========================================================================

struct MemoryFile {
    last_modified: i64,
    bytes: Vec<u8>,
}

/// In-memory source keyed by (root, relative path).
///
/// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
#[derive(Default)]
pub struct MemorySource {
    files: Mutex<BTreeMap<(PathBuf, String), MemoryFile>>,
    unreadable: Mutex<BTreeSet<String>>,
    failing_roots: Mutex<BTreeSet<PathBuf>>,
    reads: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, root: &str, rel: &str, last_modified: i64, bytes: Vec<u8>) -> Self {
        self.set_file(root, rel, last_modified, bytes);
        self
    }

    pub fn set_file(&self, root: &str, rel: &str, last_modified: i64, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(
            (PathBuf::from(root), rel.to_string()),
            MemoryFile {
                last_modified,
                bytes,
            },
        );
    }

    pub fn remove_file(&self, root: &str, rel: &str) {
        self.files
            .lock()
            .unwrap()
            .remove(&(PathBuf::from(root), rel.to_string()));
    }

    /// Listing still reports the file, but reading it fails.
    pub fn mark_unreadable(&self, rel: &str) {
        self.unreadable.lock().unwrap().insert(rel.to_string());
    }

    pub fn fail_listing(&self, root: &str) {
        self.failing_roots.lock().unwrap().insert(PathBuf::from(root));
    }

    /// Relative paths read so far, in read order.
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    pub fn clear_reads(&self) {
        self.reads.lock().unwrap().clear();
    }
}

impl ImageSource for MemorySource {
    fn list(&self, root: &Path, _recursive: bool) -> Result<Vec<FileStamp>, SourceError> {
        if self.failing_roots.lock().unwrap().contains(root) {
            return Err(SourceError::Listing {
                path: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            });
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, _), _)| r == root)
            .map(|((_, rel), file)| FileStamp::new(rel.clone(), file.last_modified))
            .collect())
    }

    fn read_bytes(&self, root: &Path, relative_path: &str) -> Result<Vec<u8>, SourceError> {
        self.reads.lock().unwrap().push(relative_path.to_string());
        let path = root.join(relative_path);
        if self.unreadable.lock().unwrap().contains(relative_path) {
            return Err(SourceError::Read {
                path,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        self.files
            .lock()
            .unwrap()
            .get(&(root.to_path_buf(), relative_path.to_string()))
            .map(|f| f.bytes.clone())
            .ok_or_else(|| SourceError::Read {
                path,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            })
    }
}
