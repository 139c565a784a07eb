//! Automatic1111 (and the many UIs that copied its format): one free-text
//! block.
//!
//! ```text
//! a cat sitting on a windowsill <lora:catStyle:0.7>
//! Negative prompt: blurry, lowres
//! Steps: 20, Sampler: Euler a, CFG scale: 8, Seed: 42, Size: 512x768, Model: dreamshaper_8
//! ```
//!
//! Everything before the negative marker is the prompt. Without a marker the
//! prompt ends at the first `Key: value` line after the first line, or at the
//! first line itself when it opens with a known settings label (a block with
//! no prompt at all).

use super::{NormalizedRecord, lora};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const NEGATIVE_MARKER: &str = "\nNegative prompt:";

/// Labels that mark a first line as settings rather than prompt text.
const SETTINGS_LABELS: [&str; 6] = ["Steps", "Sampler", "Seed", "CFG scale", "Size", "Model"];

/// A line that opens with a settings label.
static KEY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9 _/.-]*:\s").expect("static regex"));

/// `Label: value` pairs separated by commas or newlines. Values may be
/// double-quoted to carry commas.
static SETTING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:^|,)[ \t]*([A-Za-z][A-Za-z0-9 _/.-]*?):[ \t]*("(?:[^"\\]|\\.)*"|[^,\n]*)"#)
        .expect("static regex")
});

pub(super) fn normalize(text: &str) -> NormalizedRecord {
    let text = text.replace("\r\n", "\n");
    let (prompt, negative, settings) = split_sections(&text);

    let mut record = NormalizedRecord {
        prompt: prompt.trim().to_string(),
        negative_prompt: negative.trim().to_string(),
        ..NormalizedRecord::default()
    };

    let settings = parse_settings(settings);
    let get = |label: &str| settings.get(label).map(String::as_str);

    if let Some(model) = get("Model") {
        record.add_model(model);
    }
    record.steps = get("Steps").and_then(|v| v.parse().ok());
    record.scheduler = get("Sampler")
        .or_else(|| get("Schedule type"))
        .unwrap_or_default()
        .to_string();
    record.cfg_scale = get("CFG scale")
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite());
    record.seed = get("Seed").and_then(|v| v.parse().ok());
    if let Some((w, h)) = get("Size").and_then(|v| v.split_once('x')) {
        record.width = w.trim().parse().ok();
        record.height = h.trim().parse().ok();
    }

    lora::scan_prompt(&record.prompt, &mut record.loras);
    // `Lora hashes: "name: hash, other: hash"`
    if let Some(hashes) = get("Lora hashes") {
        for pair in hashes.split(',') {
            if let Some((name, _)) = pair.split_once(':') {
                record.loras.insert(name);
            }
        }
    }

    record
}

/// (prompt, negative prompt, settings block).
fn split_sections(text: &str) -> (&str, &str, &str) {
    if let Some(at) = text.find(NEGATIVE_MARKER) {
        let after = &text[at + NEGATIVE_MARKER.len()..];
        let (negative, settings) = after.split_once('\n').unwrap_or((after, ""));
        return (&text[..at], negative, settings);
    }
    match first_key_line(text) {
        Some(at) => (&text[..at], "", &text[at..]),
        None => (text, "", ""),
    }
}

/// Byte offset of the first line that opens with a label. The first line
/// only counts when its label is a known setting, so `masterpiece: a cat`
/// stays a prompt.
fn first_key_line(text: &str) -> Option<usize> {
    let mut offset = 0;
    for (n, line) in text.split_inclusive('\n').enumerate() {
        let opens_settings = if n == 0 {
            opens_with_known_label(line)
        } else {
            KEY_LINE.is_match(line)
        };
        if opens_settings {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn opens_with_known_label(line: &str) -> bool {
    line.split_once(':')
        .is_some_and(|(label, _)| SETTINGS_LABELS.contains(&label.trim()))
}

/// First occurrence of each label wins. Quoted values are unquoted.
fn parse_settings(block: &str) -> HashMap<String, String> {
    let mut settings = HashMap::new();
    for caps in SETTING.captures_iter(block) {
        let value = caps[2].trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        settings
            .entry(caps[1].trim().to_string())
            .or_insert_with(|| value.to_string());
    }
    settings
}
