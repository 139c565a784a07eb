//! JPEG metadata: EXIF text tags and XMP fields.
//!
//! Generation tools that save JPEG put their text in one of four places,
//! checked in this order (the first non-empty one wins):
//!
//! 1. EXIF `UserComment` (0x9286, Exif sub-IFD): Automatic1111, Forge, SwarmUI
//! 2. EXIF `ImageDescription` (0x010E, IFD0)
//! 3. XMP element or attribute named `parameters`
//! 4. XMP `dc:description`
//!
//! The winning text is then classified: JSON objects become JSON-shaped
//! fragments (InvokeAI or ComfyUI data re-embedded in a JPEG), anything else
//! is a free-text `parameters` fragment.

use super::{FragmentKey, RawFragmentMap, insert_fragment};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
const TAG_USER_COMMENT: u16 = 0x9286;

pub(super) fn read_jpeg_fragments(data: &[u8]) -> RawFragmentMap {
    let mut fragments = RawFragmentMap::new();
    let Some(text) = find_metadata_text(data) else {
        return fragments;
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(object)) => route_json_object(&mut fragments, object, &text),
        _ => insert_fragment(&mut fragments, FragmentKey::Parameters.as_str(), text),
    }
    fragments
}

/// Sort a JSON object found in a JPEG onto the fragment it would have been
/// stored under in a PNG. Top-level `prompt` / `workflow` keys are split out
/// only when they hold a graph; InvokeAI metadata carries a plain string
/// `prompt` and stays whole.
fn route_json_object(
    fragments: &mut RawFragmentMap,
    object: serde_json::Map<String, Value>,
    text: &str,
) {
    let graphs: Vec<(FragmentKey, String)> = [FragmentKey::Workflow, FragmentKey::Prompt]
        .into_iter()
        .filter_map(|key| Some((key, graph_text(object.get(key.as_str())?)?)))
        .collect();
    if !graphs.is_empty() {
        for (key, graph) in graphs {
            insert_fragment(fragments, key.as_str(), graph);
        }
        return;
    }

    let is_node_map = !object.is_empty()
        && object
            .values()
            .all(|node| node.get("class_type").is_some());
    let key = if is_node_map {
        FragmentKey::Prompt
    } else if object.get("nodes").is_some_and(Value::is_array) {
        FragmentKey::Workflow
    } else {
        FragmentKey::InvokeAiMetadata
    };
    insert_fragment(fragments, key.as_str(), text.to_string());
}

/// A graph value as text: an object, or a string that parses to one.
fn graph_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => Some(value.to_string()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(_)) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Segment walk
// ---------------------------------------------------------------------------

#[derive(Default)]
struct JpegText {
    user_comment: Option<String>,
    image_description: Option<String>,
    xmp_parameters: Option<String>,
    xmp_description: Option<String>,
}

fn find_metadata_text(data: &[u8]) -> Option<String> {
    let mut found = JpegText::default();

    for segment in app1_segments(data) {
        if let Some(tiff) = segment.strip_prefix(EXIF_HEADER) {
            if let Some(exif) = Tiff::parse(tiff) {
                found.user_comment = found.user_comment.or_else(|| exif.user_comment());
                found.image_description =
                    found.image_description.or_else(|| exif.image_description());
            }
        } else if let Some(packet) = segment.strip_prefix(XMP_HEADER) {
            let xmp = read_xmp(&String::from_utf8_lossy(packet));
            found.xmp_parameters = found.xmp_parameters.or(xmp.parameters);
            found.xmp_description = found.xmp_description.or(xmp.description);
        }
    }

    found
        .user_comment
        .or(found.image_description)
        .or(found.xmp_parameters)
        .or(found.xmp_description)
}

/// Collect the payloads of all APP1 segments before the scan data starts.
fn app1_segments(data: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    let mut pos = 2;

    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            break;
        }
        let marker = data[pos + 1];
        // Fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // SOS (0xDA) means image data starts; EOI ends the file
        if marker == 0xDA || marker == 0xD9 {
            break;
        }
        // Markers without length field
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }

        let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if seg_len < 2 {
            break;
        }
        let seg_start = pos + 4;
        let seg_end = (pos + 2 + seg_len).min(data.len());
        if marker == 0xE1 && seg_start <= seg_end {
            segments.push(&data[seg_start..seg_end]);
        }
        pos += 2 + seg_len;
    }

    segments
}

// ---------------------------------------------------------------------------
// EXIF: TIFF structure inside APP1
// ---------------------------------------------------------------------------

struct Tiff<'a> {
    data: &'a [u8],
    big_endian: bool,
}

struct IfdEntry {
    tag: u16,
    typ: u16,
    count: u32,
    /// Position of the 4-byte value/offset field.
    value_pos: usize,
}

impl<'a> Tiff<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        let big_endian = match data.get(0..2)? {
            b"MM" => true,
            b"II" => false,
            _ => return None,
        };
        let tiff = Self { data, big_endian };
        if tiff.read_u16(2)? != 42 {
            return None;
        }
        Some(tiff)
    }

    fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes: [u8; 2] = self.data.get(offset..offset + 2)?.try_into().ok()?;
        Some(if self.big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    }

    fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(offset..offset + 4)?.try_into().ok()?;
        Some(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    fn ifd_entries(&self, ifd_offset: usize) -> Vec<IfdEntry> {
        let Some(count) = self.read_u16(ifd_offset) else {
            return Vec::new();
        };
        (0..count as usize)
            .map_while(|i| {
                let entry = ifd_offset + 2 + i * 12;
                Some(IfdEntry {
                    tag: self.read_u16(entry)?,
                    typ: self.read_u16(entry + 2)?,
                    count: self.read_u32(entry + 4)?,
                    value_pos: entry + 8,
                })
            })
            .collect()
    }

    /// Raw value bytes of an entry: inline when they fit in 4 bytes,
    /// otherwise at the stored offset.
    fn value_bytes(&self, entry: &IfdEntry) -> Option<&'a [u8]> {
        let byte_len = (entry.count as usize).checked_mul(type_size(entry.typ))?;
        let start = if byte_len <= 4 {
            entry.value_pos
        } else {
            self.read_u32(entry.value_pos)? as usize
        };
        self.data.get(start..start.checked_add(byte_len)?)
    }

    fn ifd0(&self) -> Vec<IfdEntry> {
        match self.read_u32(4) {
            Some(offset) => self.ifd_entries(offset as usize),
            None => Vec::new(),
        }
    }

    fn image_description(&self) -> Option<String> {
        let entry = self
            .ifd0()
            .into_iter()
            .find(|e| e.tag == TAG_IMAGE_DESCRIPTION)?;
        non_empty(trim_nul(&String::from_utf8_lossy(self.value_bytes(&entry)?)))
    }

    fn user_comment(&self) -> Option<String> {
        let pointer = self
            .ifd0()
            .into_iter()
            .find(|e| e.tag == TAG_EXIF_IFD_POINTER)?;
        let exif_offset = self.read_u32(pointer.value_pos)? as usize;
        let entry = self
            .ifd_entries(exif_offset)
            .into_iter()
            .find(|e| e.tag == TAG_USER_COMMENT)?;
        decode_user_comment(self.value_bytes(&entry)?, self.big_endian)
    }
}

/// TIFF type sizes: count is number of values, not bytes.
fn type_size(typ: u16) -> usize {
    match typ {
        1 | 2 | 6 | 7 => 1, // BYTE, ASCII, SBYTE, UNDEFINED
        3 | 8 => 2,         // SHORT, SSHORT
        4 | 9 | 11 => 4,    // LONG, SLONG, FLOAT
        5 | 10 | 12 => 8,   // RATIONAL, SRATIONAL, DOUBLE
        _ => 1,
    }
}

/// Decode an EXIF UserComment, honoring its 8-byte charset prefix.
fn decode_user_comment(bytes: &[u8], tiff_big_endian: bool) -> Option<String> {
    let text = if bytes.len() >= 8 {
        let (prefix, body) = bytes.split_at(8);
        match prefix {
            b"UNICODE\0" => decode_utf16(body, tiff_big_endian),
            b"ASCII\0\0\0" | [0, 0, 0, 0, 0, 0, 0, 0] => String::from_utf8_lossy(body).into_owned(),
            _ => String::from_utf8_lossy(bytes).into_owned(),
        }
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };
    non_empty(trim_nul(&text))
}

/// UTF-16 with byte order guessed from the text itself. Prompts are mostly
/// ASCII, so the zero half of each code unit gives the order away. Writers
/// disagree on whether to follow the TIFF byte order, hence the guess.
fn decode_utf16(body: &[u8], fallback_big_endian: bool) -> String {
    let body = &body[..body.len() - body.len() % 2];
    let zeros_even = body.iter().step_by(2).filter(|&&b| b == 0).count();
    let zeros_odd = body.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
    let big_endian = match zeros_even.cmp(&zeros_odd) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => fallback_big_endian,
    };

    let units = body.chunks_exact(2).map(|pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .filter(|&c| c != '\u{FEFF}')
        .collect()
}

fn trim_nul(s: &str) -> &str {
    s.trim_end_matches('\0').trim()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// XMP
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
struct XmpFields {
    parameters: Option<String>,
    description: Option<String>,
}

fn is_parameters_name(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"parameters")
}

/// `rdf:Description` is the XMP container element, so only the qualified
/// `dc:description` counts as a description.
fn is_description_name(qname: &[u8]) -> bool {
    qname == b"dc:description"
}

fn read_attributes(element: &BytesStart<'_>, fields: &mut XmpFields) {
    for attr in element.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if fields.parameters.is_none() && is_parameters_name(attr.key.local_name().as_ref()) {
            fields.parameters = Some(value.to_string());
        } else if fields.description.is_none() && is_description_name(attr.key.as_ref()) {
            fields.description = Some(value.to_string());
        }
    }
}

fn read_xmp(xml: &str) -> XmpFields {
    let mut fields = XmpFields::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_parameters = 0usize;
    let mut in_description = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                read_attributes(&e, &mut fields);
                if is_parameters_name(e.local_name().as_ref()) {
                    in_parameters += 1;
                } else if is_description_name(e.name().as_ref()) {
                    in_description += 1;
                }
            }
            Ok(Event::Empty(e)) => read_attributes(&e, &mut fields),
            Ok(Event::Text(te)) => {
                let text = te.unescape().unwrap_or_default();
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if in_parameters > 0 && fields.parameters.is_none() {
                    fields.parameters = Some(text.to_string());
                } else if in_description > 0 && fields.description.is_none() {
                    fields.description = Some(text.to_string());
                }
            }
            Ok(Event::End(e)) => {
                if is_parameters_name(e.local_name().as_ref()) {
                    in_parameters = in_parameters.saturating_sub(1);
                } else if is_description_name(e.name().as_ref()) {
                    in_description = in_description.saturating_sub(1);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    fields
}
