//! Dialect resolution: which generation tool wrote this metadata?
//!
//! Three tools embed mutually incompatible payloads. Resolution is a strict
//! priority chain over the fragment map; the first tier that yields usable
//! data wins, regardless of what else the file carries:
//!
//! ```text
//! 1. workflow            → ComfyUI              (node graph, + executed prompt graph)
//! 2. invokeai_metadata   → InvokeAI             (JSON object)
//! 3. parameters / description → Automatic1111   (free text)
//! 4. prompt              → ComfyUI, prompt only (node graph)
//! ```
//!
//! A JSON fragment that does not parse to an object is treated as absent and
//! resolution falls through to the next tier.

use crate::extract::{FragmentKey, RawFragmentMap};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

/// Dialect-tagged raw payload, ready for normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Dialect {
    /// UI workflow graph, plus the executed prompt graph when present.
    ComfyUi {
        workflow: Value,
        prompt: Option<Value>,
    },
    /// Only the executed prompt graph survived.
    ComfyUiPromptOnly { prompt: Value },
    InvokeAi(Map<String, Value>),
    Automatic1111(String),
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::ComfyUi { .. } => "ComfyUI",
            Dialect::ComfyUiPromptOnly { .. } => "ComfyUI (prompt only)",
            Dialect::InvokeAi(_) => "InvokeAI",
            Dialect::Automatic1111(_) => "Automatic1111",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick exactly one dialect for a fragment map.
pub fn resolve(fragments: &RawFragmentMap) -> Option<Dialect> {
    if let Some(workflow) = json_object_fragment(fragments, FragmentKey::Workflow) {
        let prompt = json_object_fragment(fragments, FragmentKey::Prompt).map(Value::Object);
        return Some(Dialect::ComfyUi {
            workflow: Value::Object(workflow),
            prompt,
        });
    }

    if let Some(metadata) = json_object_fragment(fragments, FragmentKey::InvokeAiMetadata) {
        return Some(Dialect::InvokeAi(metadata));
    }

    let text = fragments
        .get(&FragmentKey::Parameters)
        .or_else(|| fragments.get(&FragmentKey::Description))
        .filter(|t| !t.trim().is_empty());
    if let Some(text) = text {
        return Some(Dialect::Automatic1111(text.clone()));
    }

    json_object_fragment(fragments, FragmentKey::Prompt).map(|prompt| {
        Dialect::ComfyUiPromptOnly {
            prompt: Value::Object(prompt),
        }
    })
}

fn json_object_fragment(
    fragments: &RawFragmentMap,
    key: FragmentKey,
) -> Option<Map<String, Value>> {
    match parse_lenient_json(fragments.get(&key)?)? {
        Value::Object(map) => Some(map),
        // Some writers double-encode: a JSON string holding the JSON object
        Value::String(inner) => match parse_lenient_json(&inner)? {
            Value::Object(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

static NON_FINITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\b(?:NaN|Infinity)\b").expect("static regex"));

/// Parse JSON, retrying once with the non-standard `NaN` / `Infinity`
/// tokens Python's `json.dumps` emits replaced by `null`.
pub(crate) fn parse_lenient_json(text: &str) -> Option<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(_) if NON_FINITE.is_match(text) => {
            serde_json::from_str(&NON_FINITE.replace_all(text, "null")).ok()
        }
        Err(_) => None,
    }
}
