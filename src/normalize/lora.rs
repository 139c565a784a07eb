//! `<lora:name:weight>` / `<lyco:name:weight>` prompt tokens.

use super::OrderedSet;
use regex::Regex;
use std::sync::LazyLock;

static LORA_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:lora|lyco):([^:>]+)(?::[^>]*)?>").expect("static regex")
});

/// Add every LoRA named in `prompt` to `loras`, in order of appearance.
pub(super) fn scan_prompt(prompt: &str, loras: &mut OrderedSet) {
    for caps in LORA_TOKEN.captures_iter(prompt) {
        loras.insert(&caps[1]);
    }
}
