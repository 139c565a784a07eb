//! Field normalization: one canonical record out of three dialects.
//!
//! Each dialect hides the same handful of generation parameters in a very
//! different shape:
//!
//! | Dialect | Shape | Module |
//! |---|---|---|
//! | InvokeAI | flat JSON object, some values nested objects | [`invokeai`] |
//! | Automatic1111 | free text, `Key: value` settings line | [`automatic1111`] |
//! | ComfyUI | node graph, wiring between nodes | [`comfyui`] |
//!
//! [`normalize`] matches exhaustively on [`Dialect`], so a new dialect is a
//! compile error here until it has a normalizer. Normalization never fails:
//! anything that cannot be salvaged leaves the corresponding field at its
//! default.

mod automatic1111;
pub mod board;
mod comfyui;
mod invokeai;
mod lora;

use crate::dialect::Dialect;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use board::{BoardRegistry, UNCATEGORIZED};

/// Canonical, dialect-independent generation parameters for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub prompt: String,
    pub negative_prompt: String,
    /// Primary model. Also the first element of `models` when known.
    pub model: String,
    pub models: OrderedSet,
    pub loras: OrderedSet,
    /// Sampler name, or the scheduler when no sampler is named.
    pub scheduler: String,
    pub steps: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub seed: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub board: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "_analytics", skip_serializing_if = "Option::is_none")]
    pub analytics: Option<Analytics>,
}

impl Default for NormalizedRecord {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            model: String::new(),
            models: OrderedSet::default(),
            loras: OrderedSet::default(),
            scheduler: String::new(),
            steps: None,
            cfg_scale: None,
            seed: None,
            width: None,
            height: None,
            board: UNCATEGORIZED.to_string(),
            notes: None,
            analytics: None,
        }
    }
}

impl NormalizedRecord {
    /// `"WxH"` when both dimensions are known.
    pub fn dimensions(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        }
    }

    /// True when nothing searchable was recovered.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Record a model name; the first one becomes the primary `model`.
    pub(crate) fn add_model(&mut self, name: &str) {
        if self.models.insert(name) && self.model.is_empty() {
            self.model = name.trim().to_string();
        }
    }
}

/// Insertion-ordered set of names. Duplicates and blank names are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedSet(Vec<String>);

impl OrderedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` unless it is blank or already present. Returns whether
    /// it was added.
    pub fn insert(&mut self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() || self.contains(value) {
            return false;
        }
        self.0.push(value.to_string());
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a OrderedSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value.as_ref());
        }
        set
    }
}

/// Extended telemetry some tools embed next to the generation parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Analytics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_peak_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

impl Analytics {
    /// Read a telemetry object. `None` unless at least one field is present.
    pub(crate) fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let number = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).and_then(as_f64));
        let text = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).and_then(as_text));

        let analytics = Self {
            generation_time_ms: number(&["generation_time_ms", "duration_ms"]).or_else(|| {
                number(&["generation_time", "duration"]).map(|seconds| seconds * 1000.0)
            }),
            vram_peak_mb: number(&["vram_peak_mb", "peak_memory_mb", "vram_mb"]),
            gpu_device: text(&["gpu_device", "device", "gpu"]),
            steps_per_second: number(&["steps_per_second", "its", "it_per_sec"]),
            tool_version: text(&["tool_version", "app_version", "version"]),
            runtime_version: text(&["runtime_version", "torch_version", "python_version"]),
        };
        (analytics != Self::default()).then_some(analytics)
    }
}

/// Turn dialect-tagged raw data into a [`NormalizedRecord`].
///
/// Opaque InvokeAI board ids are labelled through `boards`, which must live
/// for the whole session so the labels stay stable.
pub fn normalize(dialect: &Dialect, boards: &BoardRegistry) -> NormalizedRecord {
    match dialect {
        Dialect::InvokeAi(metadata) => invokeai::normalize(metadata, boards),
        Dialect::Automatic1111(text) => automatic1111::normalize(text),
        Dialect::ComfyUi { workflow, prompt } => {
            comfyui::normalize(prompt.as_ref(), Some(workflow))
        }
        Dialect::ComfyUiPromptOnly { prompt } => comfyui::normalize(Some(prompt), None),
    }
}

// ============================================================================
// Lenient value readers shared by the JSON dialects
// ============================================================================

/// Trimmed, non-empty string.
pub(crate) fn as_text(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Number, or a string holding one.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

/// Non-negative whole number. `7.0` counts, `7.5` does not.
pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    if let Some(s) = value.as_str() {
        if let Ok(n) = s.trim().parse::<u64>() {
            return Some(n);
        }
    }
    let f = as_f64(value)?;
    (f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

pub(crate) fn as_u32(value: &Value) -> Option<u32> {
    as_u64(value).and_then(|n| u32::try_from(n).ok())
}
