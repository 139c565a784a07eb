//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every entity leads with what it *is* (a prompt, a root, a facet value)
//! and pushes filesystem paths down into indented `Source:` lines. A list of
//! hits reads as an inventory of generations, not a directory listing.
//!
//! # Output Format
//!
//! ## Index
//!
//! ```text
//! /photos/ai: 3 to parse, 120 unchanged, 1 removed
//!     001 cat.png (sdxl, 20 steps)
//!     002 dog.png (no metadata)
//!     skipped broken.png: cannot read ...
//! /photos/ai: done (2 parsed, 120 unchanged, 1 removed, 1 skipped)
//! ```
//!
//! ## Query
//!
//! ```text
//! 001 A cat on a sofa
//!     Source: /photos/ai/cat.png
//!     sdxl · Euler a · 20 steps · CFG 7 · seed 42 · 512x768
//!     Modified: 2024-03-10
//!
//! 1 match
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.

use crate::engine::{EngineError, IndexEvent, IndexOutcome, RootSpec};
use crate::index::IndexEntry;
use crate::normalize::NormalizedRecord;
use crate::parse::Inspection;
use crate::query::{Facets, QueryHit, modified_date};
use std::collections::BTreeMap;
use std::path::Path;

/// Longest prompt shown in a header line.
const HEADER_PROMPT_CHARS: usize = 72;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate to `max` characters, appending `...` if truncated.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// First line of a prompt, shortened for a header.
fn prompt_headline(prompt: &str) -> String {
    let first = prompt.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    truncate(first.trim(), HEADER_PROMPT_CHARS)
}

/// One-line parameter summary: `sdxl · Euler a · 20 steps · CFG 7 · seed 42 · 512x768`.
fn parameter_summary(record: &NormalizedRecord) -> Option<String> {
    let mut parts = Vec::new();
    if !record.model.is_empty() {
        parts.push(record.model.clone());
    }
    if !record.scheduler.is_empty() {
        parts.push(record.scheduler.clone());
    }
    if let Some(steps) = record.steps {
        parts.push(format!("{steps} steps"));
    }
    if let Some(cfg) = record.cfg_scale {
        parts.push(format!("CFG {cfg}"));
    }
    if let Some(seed) = record.seed {
        parts.push(format!("seed {seed}"));
    }
    if let Some(dimensions) = record.dimensions() {
        parts.push(dimensions);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" · "))
    }
}

/// `"sdxl, 20 steps"` or `"no metadata"`, for progress lines.
fn entry_brief(entry: &IndexEntry) -> String {
    let record = &entry.metadata;
    if record.is_empty() {
        return "no metadata".to_string();
    }
    let mut parts = Vec::new();
    if !record.model.is_empty() {
        parts.push(record.model.clone());
    }
    if let Some(steps) = record.steps {
        parts.push(format!("{steps} steps"));
    }
    if parts.is_empty() {
        parts.push(prompt_headline(&record.prompt));
    }
    parts.join(", ")
}

fn labelled(depth: usize, label: &str, value: &str) -> Option<String> {
    (!value.is_empty()).then(|| format!("{}{}: {}", indent(depth), label, value))
}

/// Every populated field of a record, one per line.
fn record_lines(record: &NormalizedRecord, depth: usize) -> Vec<String> {
    let join = |items: &[String]| items.join(", ");
    let optional = |value: Option<String>| value.unwrap_or_default();

    [
        labelled(depth, "Prompt", &record.prompt),
        labelled(depth, "Negative", &record.negative_prompt),
        labelled(depth, "Models", &join(record.models.as_slice())),
        labelled(depth, "LoRAs", &join(record.loras.as_slice())),
        labelled(depth, "Scheduler", &record.scheduler),
        labelled(depth, "Steps", &optional(record.steps.map(|v| v.to_string()))),
        labelled(depth, "CFG scale", &optional(record.cfg_scale.map(|v| v.to_string()))),
        labelled(depth, "Seed", &optional(record.seed.map(|v| v.to_string()))),
        labelled(depth, "Size", &optional(record.dimensions())),
        labelled(depth, "Board", &record.board),
        labelled(depth, "Notes", record.notes.as_deref().unwrap_or_default()),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// ============================================================================
// Index
// ============================================================================

/// Format a single indexing event as display lines.
pub fn format_index_event(event: &IndexEvent) -> Vec<String> {
    match event {
        IndexEvent::Started {
            root,
            to_process,
            unchanged,
            deleted,
        } => vec![format!(
            "{}: {} to parse, {} unchanged, {} removed",
            root.display(),
            to_process,
            unchanged,
            deleted
        )],
        IndexEvent::BatchCommitted {
            entries, processed, ..
        } => {
            let first = processed.saturating_sub(entries.len()) + 1;
            entries
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    format!(
                        "{}{} {} ({})",
                        indent(1),
                        format_index(first + i),
                        entry.relative_path,
                        entry_brief(entry)
                    )
                })
                .collect()
        }
        IndexEvent::FileSkipped {
            relative_path,
            error,
            ..
        } => vec![format!("{}skipped {}: {}", indent(1), relative_path, error)],
        IndexEvent::Paused { root } => vec![format!("{}: paused", root.display())],
        IndexEvent::Resumed { root } => vec![format!("{}: resumed", root.display())],
        IndexEvent::Completed {
            root,
            stats,
            cancelled,
            persist_error,
        } => {
            let verb = if *cancelled { "cancelled" } else { "done" };
            let mut lines = vec![format!("{}: {} ({})", root.display(), verb, stats)];
            if let Some(err) = persist_error {
                lines.push(format!("{}Snapshot not saved: {}", indent(1), err));
            }
            lines
        }
        IndexEvent::Failed { root, error } => {
            vec![format!("{}: failed: {}", root.display(), error)]
        }
    }
}

/// Closing summary over every root of one `index` invocation.
pub fn format_index_summary(
    results: &[(RootSpec, Result<IndexOutcome, EngineError>)],
) -> Vec<String> {
    let (ok, failed): (Vec<_>, Vec<_>) = results.iter().partition(|(_, r)| r.is_ok());
    let entries: usize = ok
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok())
        .map(|o| o.snapshot.len())
        .sum();
    let cancelled = ok
        .iter()
        .filter(|(_, r)| r.as_ref().is_ok_and(|o| o.cancelled))
        .count();

    let mut summary = format!(
        "Indexed {} root{}, {} image{}",
        ok.len(),
        plural(ok.len()),
        entries,
        plural(entries)
    );
    if cancelled > 0 {
        summary.push_str(&format!(", {cancelled} cancelled"));
    }
    if !failed.is_empty() {
        summary.push_str(&format!(", {} failed", failed.len()));
    }
    vec![summary]
}

pub fn print_index_summary(results: &[(RootSpec, Result<IndexOutcome, EngineError>)]) {
    for line in format_index_summary(results) {
        println!("{}", line);
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

// ============================================================================
// Inspect
// ============================================================================

/// Every stage of parsing one file.
pub fn format_inspection(path: &Path, inspection: &Inspection) -> Vec<String> {
    let mut lines = vec![path.display().to_string()];
    let fragments = match &inspection.fragments {
        Some(map) => map.keys().map(|k| k.as_str()).collect::<Vec<_>>().join(", "),
        None => "none".to_string(),
    };
    lines.push(format!("{}Fragments: {}", indent(1), fragments));
    let dialect = inspection.dialect.as_ref().map_or("none", |d| d.name());
    lines.push(format!("{}Dialect: {}", indent(1), dialect));
    lines.extend(record_lines(&inspection.record, 1));
    if let Some(analytics) = &inspection.record.analytics {
        if let Some(ms) = analytics.generation_time_ms {
            lines.push(format!("{}Generation time: {} ms", indent(1), ms));
        }
        if let Some(device) = &analytics.gpu_device {
            lines.push(format!("{}Device: {}", indent(1), device));
        }
    }
    lines
}

pub fn print_inspection(path: &Path, inspection: &Inspection) {
    for line in format_inspection(path, inspection) {
        println!("{}", line);
    }
}

// ============================================================================
// Query
// ============================================================================

pub fn format_query_hits(hits: &[QueryHit<'_>]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, hit) in hits.iter().enumerate() {
        let record = &hit.entry.metadata;
        let title = prompt_headline(&record.prompt);
        if title.is_empty() {
            lines.push(format!("{} ({})", format_index(i + 1), hit.entry.relative_path));
        } else {
            lines.push(format!("{} {}", format_index(i + 1), title));
        }
        lines.push(format!(
            "{}Source: {}",
            indent(1),
            hit.root.root_path.join(&hit.entry.relative_path).display()
        ));
        if let Some(summary) = parameter_summary(record) {
            lines.push(format!("{}{}", indent(1), summary));
        }
        if let Some(date) = modified_date(hit.entry.last_modified) {
            lines.push(format!("{}Modified: {}", indent(1), date));
        }
    }
    if !hits.is_empty() {
        lines.push(String::new());
    }
    let n = hits.len();
    lines.push(format!("{} match{}", n, if n == 1 { "" } else { "es" }));
    lines
}

pub fn print_query_hits(hits: &[QueryHit<'_>]) {
    for line in format_query_hits(hits) {
        println!("{}", line);
    }
}

// ============================================================================
// Facets
// ============================================================================

pub fn format_facets(facets: &Facets) -> Vec<String> {
    if facets.is_empty() {
        return vec!["No indexed images".to_string()];
    }
    let mut lines = Vec::new();
    let sections: [(&str, &BTreeMap<String, usize>); 4] = [
        ("Models", &facets.models),
        ("LoRAs", &facets.loras),
        ("Schedulers", &facets.schedulers),
        ("Boards", &facets.boards),
    ];
    for (title, counts) in sections {
        if counts.is_empty() {
            continue;
        }
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(title.to_string());
        for (value, count) in counts {
            lines.push(format!("{}{} ({})", indent(1), value, count));
        }
    }
    lines
}

pub fn print_facets(facets: &Facets) {
    for line in format_facets(facets) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
