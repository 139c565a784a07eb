//! InvokeAI: a flat JSON object, with models, LoRAs and boards as nested
//! objects whose shape changed between InvokeAI releases.
//!
//! Model references come in several generations:
//!
//! ```text
//! "model": "sd-1.5"
//! "model": {"model_name": "sd-1.5", "base_model": "sd-1"}
//! "model": {"key": "3f2a...", "hash": "blake3:...", "name": "Juggernaut XL", "base": "sdxl"}
//! "model": {"key": "3f2a..."}                       ← no display field at all
//! ```
//!
//! Display names are looked up field by field; an object with none is labelled
//! by a short identifier so it still groups in facets.

use super::board::{BoardRegistry, UNCATEGORIZED};
use super::{Analytics, NormalizedRecord, as_f64, as_text, as_u32, as_u64, lora};
use crate::dialect::parse_lenient_json;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Sub-fields that may hold a model's display name, in preference order.
const NAME_FIELDS: [&str; 6] = ["name", "model", "model_name", "base_model", "mechanism", "type"];

/// Fields identifying a model when it has no display name.
const IDENTIFIER_FIELDS: [&str; 3] = ["key", "hash", "id"];

/// What some JavaScript front-ends wrote when they stringified an object.
const STRINGIFIED_OBJECT: &str = "[object Object]";

pub(super) fn normalize(meta: &Map<String, Value>, boards: &BoardRegistry) -> NormalizedRecord {
    let mut record = NormalizedRecord {
        prompt: positive_prompt(meta).unwrap_or_default(),
        negative_prompt: meta.get("negative_prompt").and_then(as_text).unwrap_or_default(),
        scheduler: meta.get("scheduler").and_then(as_text).unwrap_or_default(),
        steps: meta.get("steps").and_then(as_u32),
        cfg_scale: meta.get("cfg_scale").and_then(as_f64),
        seed: meta.get("seed").and_then(as_u64),
        width: meta.get("width").and_then(as_u32),
        height: meta.get("height").and_then(as_u32),
        notes: meta.get("notes").and_then(as_text),
        analytics: meta.get("_analytics").and_then(Analytics::from_json),
        ..NormalizedRecord::default()
    };

    if let Some(model) = ["model", "base_model", "model_name"]
        .iter()
        .find_map(|key| meta.get(*key).and_then(display_name))
    {
        record.add_model(&model);
    }
    if let Some(refiner) = meta.get("refiner_model").and_then(display_name) {
        record.add_model(&refiner);
    }

    lora::scan_prompt(&record.prompt, &mut record.loras);
    if let Some(entries) = meta.get("loras").and_then(Value::as_array) {
        for name in entries.iter().filter_map(lora_name) {
            record.loras.insert(&name);
        }
    }

    record.board = resolve_board(meta, boards);
    record
}

/// `positive_prompt`, else `prompt` as a string or as `[{"prompt": ...}]`.
fn positive_prompt(meta: &Map<String, Value>) -> Option<String> {
    if let Some(text) = meta.get("positive_prompt").and_then(as_text) {
        return Some(text);
    }
    match meta.get("prompt")? {
        Value::String(_) => meta.get("prompt").and_then(as_text),
        Value::Array(parts) => parts
            .iter()
            .find_map(|part| part.get("prompt").and_then(as_text).or_else(|| as_text(part))),
        _ => None,
    }
}

// ============================================================================
// Model / LoRA names
// ============================================================================

/// Display string for a model reference: a string, or an object searched
/// through [`NAME_FIELDS`] (recursing into nested objects), falling back to
/// a short identifier.
fn display_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_name(s),
        Value::Object(obj) if !obj.is_empty() => NAME_FIELDS
            .iter()
            .find_map(|field| match obj.get(*field)? {
                Value::String(s) => clean_name(s),
                nested @ Value::Object(_) => display_name(nested),
                _ => None,
            })
            .or_else(|| Some(identifier_label(obj))),
        _ => None,
    }
}

fn clean_name(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty() && s != STRINGIFIED_OBJECT).then(|| s.to_string())
}

/// `"3f2a9c1b (key)"`, or a digest of the whole object when it has no
/// identifier field either.
fn identifier_label(obj: &Map<String, Value>) -> String {
    for field in IDENTIFIER_FIELDS {
        if let Some(id) = obj.get(field).and_then(as_text) {
            let id = id.rsplit(':').next().unwrap_or(id.as_str());
            return format!("{} ({field})", short(id));
        }
    }
    let digest = Sha256::digest(Value::Object(obj.clone()).to_string().as_bytes());
    format!("{} (sha256)", short(&format!("{digest:x}")))
}

fn short(id: &str) -> String {
    id.chars().filter(|c| *c != '-').take(8).collect()
}

/// One `loras` array entry: a name string, `{"lora": {...}, "weight": ...}`,
/// or `{"model": {...}, "weight": ...}`.
fn lora_name(entry: &Value) -> Option<String> {
    match entry {
        Value::Object(obj) => match obj.get("lora") {
            Some(inner) => display_name(inner),
            None => display_name(entry),
        },
        _ => display_name(entry),
    }
}

// ============================================================================
// Boards
// ============================================================================

/// Board reference candidates found in one place. A name always beats an id,
/// wherever each was found.
#[derive(Debug, Default)]
struct BoardRef {
    name: Option<String>,
    id: Option<String>,
}

impl BoardRef {
    fn or(self, other: impl FnOnce() -> BoardRef) -> BoardRef {
        if self.name.is_some() {
            return self;
        }
        let other = other();
        BoardRef {
            name: other.name,
            id: self.id.or(other.id),
        }
    }
}

fn resolve_board(meta: &Map<String, Value>, boards: &BoardRegistry) -> String {
    let found = board_ref_in(meta)
        .or(|| canvas_board_ref(meta))
        .or(|| workflow_board_ref(meta));
    match found {
        BoardRef { name: Some(name), .. } => name,
        BoardRef { id: Some(id), .. } => boards.label_for(&id),
        _ => UNCATEGORIZED.to_string(),
    }
}

/// `board_name` / `board_id` (any case), then a `board` object or string.
fn board_ref_in(obj: &Map<String, Value>) -> BoardRef {
    let mut found = BoardRef::default();
    for (key, value) in obj {
        let key = key.to_ascii_lowercase().replace('_', "");
        if key == "boardname" && found.name.is_none() {
            found.name = as_text(value).filter(|n| !is_none_marker(n));
        } else if key == "boardid" && found.id.is_none() {
            found.id = board_id(value);
        }
    }
    if found.name.is_some() {
        return found;
    }
    match obj.get("board") {
        Some(board) => found.or(|| board_ref_from_value(board)),
        None => found,
    }
}

/// A standalone board value: an object with name/id fields, or a bare string
/// that is a name unless it looks like an id.
fn board_ref_from_value(value: &Value) -> BoardRef {
    match value {
        Value::Object(board) => {
            let named = board_ref_in(board);
            let name = named
                .name
                .or_else(|| board.get("name").and_then(as_text))
                .filter(|n| !is_none_marker(n));
            let id = named.id.or_else(|| board.get("id").and_then(board_id));
            BoardRef { name, id }
        }
        Value::String(s) if looks_opaque(s) => BoardRef {
            id: board_id(value),
            ..BoardRef::default()
        },
        Value::String(_) => BoardRef {
            name: as_text(value).filter(|n| !is_none_marker(n)),
            ..BoardRef::default()
        },
        Value::Number(_) => BoardRef {
            id: board_id(value),
            ..BoardRef::default()
        },
        _ => BoardRef::default(),
    }
}

fn board_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        _ => as_text(value).filter(|id| !is_none_marker(id)),
    }
}

fn is_none_marker(s: &str) -> bool {
    s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("null")
}

/// All digits, or a long hex/UUID-ish token.
fn looks_opaque(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty()
        && (s.chars().all(|c| c.is_ascii_digit())
            || (s.len() >= 16 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')))
}

/// A JSON object that may itself be stored as a JSON string.
fn embedded_object(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(obj) => Some(obj.clone()),
        Value::String(s) => match parse_lenient_json(s)? {
            Value::Object(obj) => Some(obj),
            _ => None,
        },
        _ => None,
    }
}

fn canvas_board_ref(meta: &Map<String, Value>) -> BoardRef {
    ["canvas_v2_metadata", "canvas_metadata", "canvas"]
        .iter()
        .filter_map(|key| meta.get(*key).and_then(embedded_object))
        .map(|canvas| board_ref_in(&canvas))
        .fold(BoardRef::default(), |acc, next| acc.or(|| next))
}

/// Board input of an image-output node in an embedded workflow graph.
fn workflow_board_ref(meta: &Map<String, Value>) -> BoardRef {
    let Some(workflow) = meta.get("workflow").and_then(embedded_object) else {
        return BoardRef::default();
    };
    let Some(nodes) = workflow.get("nodes").and_then(Value::as_array) else {
        return BoardRef::default();
    };

    let mut found = BoardRef::default();
    for node in nodes {
        let data = node.get("data").unwrap_or(node);
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !is_image_output(&kind) {
            continue;
        }
        if let Some(board) = data.pointer("/inputs/board/value").or_else(|| data.get("board")) {
            found = found.or(|| board_ref_from_value(board));
            if found.name.is_some() {
                break;
            }
        }
    }
    found
}

fn is_image_output(kind: &str) -> bool {
    kind == "l2i"
        || kind.ends_with("_l2i")
        || kind.contains("save_image")
        || kind.contains("output")
}
