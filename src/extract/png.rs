//! PNG text chunk walker.
//!
//! Chunk layout (after the 8-byte signature):
//!   Bytes 0-3:  Data length (big-endian u32)
//!   Bytes 4-7:  Chunk type (ASCII)
//!   Bytes 8+:   Data
//!   Last 4:     CRC (skipped, never verified)
//!
//! Text payloads:
//!   tEXt  keyword \0 text
//!   zTXt  keyword \0 method zlib-stream
//!   iTXt  keyword \0 flag method language \0 translated-keyword \0 text-or-zlib-stream

use super::{MAX_RECOGNIZED_FRAGMENTS, RawFragmentMap, decode_text, insert_fragment};
use flate2::read::ZlibDecoder;
use std::io::Read;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Upper bound on inflated text. ComfyUI workflows run to a few hundred KB.
const MAX_INFLATED_LEN: u64 = 8 * 1024 * 1024;

/// Walk the chunk table and collect recognized text fragments.
///
/// Stops at `IEND`, at the first chunk whose declared length runs past the
/// buffer, or once every recognized keyword has been seen.
pub(super) fn read_png_fragments(data: &[u8]) -> RawFragmentMap {
    let mut fragments = RawFragmentMap::new();
    let mut pos = PNG_SIGNATURE.len();

    while pos + 8 <= data.len() {
        let length =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let chunk_type = &data[pos + 4..pos + 8];
        let body_start = pos + 8;
        let Some(body_end) = body_start
            .checked_add(length)
            .filter(|&end| end <= data.len())
        else {
            break;
        };
        let body = &data[body_start..body_end];

        match chunk_type {
            b"IEND" => break,
            b"tEXt" => {
                if let Some((keyword, text)) = parse_text_chunk(body) {
                    insert_fragment(&mut fragments, &keyword, text);
                }
            }
            b"zTXt" => {
                if let Some((keyword, text)) = parse_ztxt_chunk(body) {
                    insert_fragment(&mut fragments, &keyword, text);
                }
            }
            b"iTXt" => {
                if let Some((keyword, text)) = parse_itxt_chunk(body) {
                    insert_fragment(&mut fragments, &keyword, text);
                }
            }
            _ => {}
        }

        if fragments.len() >= MAX_RECOGNIZED_FRAGMENTS {
            break;
        }
        pos = body_end + 4;
    }

    fragments
}

/// Split off a NUL-terminated field. Returns (field, rest-after-NUL).
fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    Some((&data[..nul], &data[nul + 1..]))
}

fn parse_text_chunk(body: &[u8]) -> Option<(String, String)> {
    let (keyword, text) = split_nul(body)?;
    Some((decode_text(keyword), decode_text(text)))
}

fn parse_ztxt_chunk(body: &[u8]) -> Option<(String, String)> {
    let (keyword, rest) = split_nul(body)?;
    let (&method, stream) = rest.split_first()?;
    if method != 0 {
        return None;
    }
    let inflated = inflate(stream)?;
    Some((decode_text(keyword), decode_text(&inflated)))
}

fn parse_itxt_chunk(body: &[u8]) -> Option<(String, String)> {
    let (keyword, rest) = split_nul(body)?;
    if rest.len() < 2 {
        return None;
    }
    let compressed = rest[0];
    let method = rest[1];
    let (_language, rest) = split_nul(&rest[2..])?;
    let (_translated, text) = split_nul(rest)?;

    let text = match (compressed, method) {
        (0, _) => String::from_utf8_lossy(text).into_owned(),
        (1, 0) => String::from_utf8_lossy(&inflate(text)?).into_owned(),
        _ => return None,
    };
    Some((decode_text(keyword), text))
}

/// Inflate a zlib stream. `None` when the stream is corrupt.
fn inflate(stream: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(stream)
        .take(MAX_INFLATED_LEN)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}
