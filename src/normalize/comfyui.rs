//! ComfyUI: parameters live on nodes of a graph, and prompt polarity lives
//! in the wiring.
//!
//! Two serializations reach us:
//!
//! ```text
//! prompt (API) graph     {"3": {"class_type": "KSampler", "inputs": {"positive": ["6", 0], "steps": 20}}}
//! workflow (UI) graph    {"nodes": [{"id": 3, "type": "KSampler", "inputs": [{"name": "positive", "link": 4}],
//!                                    "widgets_values": [42, "fixed", 20, 8, "euler", "normal", 1]}],
//!                         "links": [[4, 6, 0, 3, 1, "CONDITIONING"]]}
//! ```
//!
//! Both are lowered to [`GraphNode`]s whose linked inputs read `[source_id,
//! slot]`, so one extractor serves both. The executed prompt graph is
//! preferred; gaps are filled from the workflow graph.
//!
//! Polarity is best-effort: a text encoder is negative or positive according
//! to the input it feeds (followed forward through conditioning nodes), with
//! a word list as the last resort.

use super::{Analytics, NormalizedRecord, as_f64, as_text, as_u32, as_u64};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};

/// Forward wiring hops followed when classifying a text encoder.
const MAX_TRACE_HOPS: usize = 8;

/// Words that mark an unclassified prompt as negative.
const NEGATIVE_WORDS: [&str; 10] = [
    "blur",
    "deform",
    "ugly",
    "worst",
    "bad anatomy",
    "bad hands",
    "lowres",
    "low quality",
    "watermark",
    "jpeg artifacts",
];

#[derive(Debug, Clone)]
struct GraphNode {
    id: String,
    /// Lowercased class name.
    class: String,
    inputs: Map<String, Value>,
    widgets: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Positive,
    Negative,
}

pub(super) fn normalize(prompt: Option<&Value>, workflow: Option<&Value>) -> NormalizedRecord {
    let prompt_nodes = prompt.map(graph_nodes).unwrap_or_default();
    let workflow_nodes = workflow.map(graph_nodes).unwrap_or_default();

    let mut record = match (prompt_nodes.is_empty(), workflow_nodes.is_empty()) {
        (false, true) => extract(&prompt_nodes),
        (true, false) => extract(&workflow_nodes),
        (false, false) => {
            let mut record = extract(&prompt_nodes);
            fill_gaps(&mut record, extract(&workflow_nodes));
            record
        }
        (true, true) => NormalizedRecord::default(),
    };

    let notes: Vec<String> = workflow_nodes
        .iter()
        .chain(&prompt_nodes)
        .filter(|node| node.class == "note" || node.class == "markdownnote")
        .filter_map(|node| {
            node.inputs
                .get("text")
                .and_then(as_text)
                .or_else(|| first_text_widget(node))
        })
        .collect();
    if !notes.is_empty() {
        record.notes = Some(notes.join("\n\n"));
    }

    record.analytics = [prompt, workflow]
        .into_iter()
        .flatten()
        .find_map(|graph| {
            graph
                .get("_analytics")
                .or_else(|| graph.pointer("/extra/_analytics"))
                .and_then(Analytics::from_json)
        });

    record
}

/// Empty fields of `record` take the value found in `other`.
fn fill_gaps(record: &mut NormalizedRecord, other: NormalizedRecord) {
    if record.prompt.is_empty() {
        record.prompt = other.prompt;
    }
    if record.negative_prompt.is_empty() {
        record.negative_prompt = other.negative_prompt;
    }
    if record.models.is_empty() {
        record.model = other.model;
        record.models = other.models;
    }
    if record.loras.is_empty() {
        record.loras = other.loras;
    }
    if record.scheduler.is_empty() {
        record.scheduler = other.scheduler;
    }
    record.steps = record.steps.or(other.steps);
    record.cfg_scale = record.cfg_scale.or(other.cfg_scale);
    record.seed = record.seed.or(other.seed);
    record.width = record.width.or(other.width);
    record.height = record.height.or(other.height);
}

// ============================================================================
// Graph lowering
// ============================================================================

/// Nodes of either serialization, ordered by numeric id.
fn graph_nodes(graph: &Value) -> Vec<GraphNode> {
    let Some(obj) = graph.as_object() else {
        return Vec::new();
    };
    let mut nodes = match obj.get("nodes").and_then(Value::as_array) {
        Some(nodes) => workflow_nodes(nodes, obj.get("links")),
        None => api_nodes(obj),
    };
    nodes.sort_by(|a, b| {
        let key = |id: &str| id.parse::<u64>().map_or((1, 0), |n| (0, n));
        key(&a.id).cmp(&key(&b.id)).then_with(|| a.id.cmp(&b.id))
    });
    nodes
}

fn api_nodes(graph: &Map<String, Value>) -> Vec<GraphNode> {
    graph
        .iter()
        .filter_map(|(id, node)| {
            let class = node.get("class_type")?.as_str()?;
            Some(GraphNode {
                id: id.clone(),
                class: class.to_ascii_lowercase(),
                inputs: node
                    .get("inputs")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                widgets: widgets_of(node),
            })
        })
        .collect()
}

fn workflow_nodes(nodes: &[Value], links: Option<&Value>) -> Vec<GraphNode> {
    // link id → [source node id, source slot]
    let mut sources: HashMap<String, Value> = HashMap::new();
    for link in links.and_then(Value::as_array).into_iter().flatten() {
        let (id, from, slot) = match link {
            Value::Array(parts) if parts.len() >= 3 => (&parts[0], &parts[1], &parts[2]),
            Value::Object(l) => match (l.get("id"), l.get("origin_id"), l.get("origin_slot")) {
                (Some(id), Some(from), Some(slot)) => (id, from, slot),
                _ => continue,
            },
            _ => continue,
        };
        if let (Some(id), Some(from)) = (id_string(id), id_string(from)) {
            sources.insert(id, json!([from, slot.clone()]));
        }
    }

    nodes
        .iter()
        .filter_map(|node| {
            let id = id_string(node.get("id")?)?;
            let class = node.get("type")?.as_str()?.to_ascii_lowercase();
            let mut inputs = Map::new();
            for input in node.get("inputs").and_then(Value::as_array).into_iter().flatten() {
                let (Some(name), Some(link)) = (
                    input.get("name").and_then(Value::as_str),
                    input.get("link").and_then(id_string),
                ) else {
                    continue;
                };
                if let Some(source) = sources.get(&link) {
                    inputs.insert(name.to_string(), source.clone());
                }
            }
            Some(GraphNode {
                id,
                class,
                inputs,
                widgets: widgets_of(node),
            })
        })
        .collect()
}

fn widgets_of(node: &Value) -> Vec<Value> {
    node.get("widgets_values")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

// ============================================================================
// Extraction
// ============================================================================

fn extract(nodes: &[GraphNode]) -> NormalizedRecord {
    let mut record = NormalizedRecord::default();
    let mut positive: Option<String> = None;
    let mut negative: Option<String> = None;

    for node in nodes {
        let class = node.class.as_str();
        if class.contains("checkpointloader") || class.contains("unetloader") {
            if let Some(name) = loader_name(node, &["ckpt_name", "unet_name", "model"]) {
                record.add_model(&name);
            }
        } else if class.contains("loraloader") {
            if let Some(name) = loader_name(node, &["lora_name", "lora"]) {
                record.loras.insert(&name);
            }
        } else if class.contains("ksampler") || class.starts_with("samplercustom") {
            read_sampler(node, &mut record);
        } else if class.contains("latentimage") {
            let w = input_or_widget(node, "width", 0).and_then(as_u32);
            let h = input_or_widget(node, "height", 1).and_then(as_u32);
            if record.width.is_none() && record.height.is_none() {
                record.width = w;
                record.height = h;
            }
        } else if class.contains("cliptextencode") {
            let Some(text) = encoder_text(node) else {
                continue;
            };
            let polarity =
                trace_polarity(nodes, &node.id).unwrap_or_else(|| lexical_polarity(&text));
            let slot = match polarity {
                Polarity::Positive => &mut positive,
                Polarity::Negative => &mut negative,
            };
            slot.get_or_insert(text);
        }
    }

    record.prompt = positive.unwrap_or_default();
    record.negative_prompt = negative.unwrap_or_default();
    record
}

/// Loader file name: first string widget, else a string input whose key
/// contains one of `needles`.
fn loader_name(node: &GraphNode, needles: &[&str]) -> Option<String> {
    first_text_widget(node).or_else(|| {
        node.inputs
            .iter()
            .filter(|(key, _)| needles.iter().any(|needle| key.contains(needle)))
            .find_map(|(_, value)| as_text(value))
    })
}

fn first_text_widget(node: &GraphNode) -> Option<String> {
    node.widgets.first().and_then(as_text)
}

/// Named input, else the widget at `position`. Linked inputs are skipped.
fn input_or_widget<'a>(node: &'a GraphNode, name: &str, position: usize) -> Option<&'a Value> {
    node.inputs
        .get(name)
        .filter(|v| !v.is_array())
        .or_else(|| node.widgets.get(position))
}

/// Widget positions of `(seed, steps, cfg, sampler_name, scheduler)`.
fn sampler_widget_layout(class: &str) -> Option<[usize; 5]> {
    match class {
        // seed, control_after_generate, steps, cfg, sampler_name, scheduler, denoise
        "ksampler" => Some([0, 2, 3, 4, 5]),
        // add_noise, noise_seed, control_after_generate, steps, cfg, sampler_name, scheduler, ...
        "ksampleradvanced" => Some([1, 3, 4, 5, 6]),
        _ => None,
    }
}

/// First sampler wins per field; later samplers only fill gaps.
fn read_sampler(node: &GraphNode, record: &mut NormalizedRecord) {
    let layout = sampler_widget_layout(&node.class);
    let field = |names: &[&str], slot: usize| sampler_field(node, layout, names, slot);

    record.seed = record.seed.or_else(|| field(&["seed", "noise_seed"], 0).and_then(as_u64));
    record.steps = record.steps.or_else(|| field(&["steps"], 1).and_then(as_u32));
    record.cfg_scale = record.cfg_scale.or_else(|| field(&["cfg"], 2).and_then(as_f64));
    if record.scheduler.is_empty() {
        record.scheduler = field(&["sampler_name"], 3)
            .and_then(as_text)
            .or_else(|| field(&["scheduler"], 4).and_then(as_text))
            .unwrap_or_default();
    }
}

fn sampler_field<'a>(
    node: &'a GraphNode,
    layout: Option<[usize; 5]>,
    names: &[&str],
    slot: usize,
) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| node.inputs.get(*name).filter(|v| !v.is_array()))
        .or_else(|| layout.and_then(|l| node.widgets.get(l[slot])))
}

fn encoder_text(node: &GraphNode) -> Option<String> {
    ["text", "text_g", "text_l"]
        .iter()
        .find_map(|key| node.inputs.get(*key).and_then(as_text))
        .or_else(|| first_text_widget(node))
}

// ============================================================================
// Polarity
// ============================================================================

/// Does `value` reference node `id` (`[id, slot]`)?
fn references(value: &Value, id: &str) -> bool {
    value
        .as_array()
        .and_then(|link| link.first())
        .and_then(id_string)
        .is_some_and(|source| source == id)
}

fn polarity_of_name(name: &str) -> Option<Polarity> {
    let name = name.to_ascii_lowercase();
    if name.contains("negative") {
        Some(Polarity::Negative)
    } else if name.contains("positive") {
        Some(Polarity::Positive)
    } else {
        None
    }
}

/// Follow the wiring forward from `start` until an input name or class
/// name gives the polarity away.
///
/// Per hop: an input named `positive`/`negative` decides first, then a
/// consumer class naming `negative`/`positive`. A `conditioning` class only
/// decides (as positive) once the walk runs out.
fn trace_polarity(nodes: &[GraphNode], start: &str) -> Option<Polarity> {
    let mut frontier = vec![start.to_string()];
    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    let mut through_conditioning = false;

    for _ in 0..MAX_TRACE_HOPS {
        let mut consumers: Vec<(&GraphNode, &str)> = Vec::new();
        for id in &frontier {
            for node in nodes.iter().filter(|n| &n.id != id) {
                for (key, value) in &node.inputs {
                    if references(value, id) {
                        consumers.push((node, key.as_str()));
                    }
                }
            }
        }
        if consumers.is_empty() {
            break;
        }

        if let Some(p) = consumers.iter().find_map(|(_, key)| polarity_of_name(key)) {
            return Some(p);
        }
        if let Some(p) = consumers.iter().find_map(|(node, _)| polarity_of_name(&node.class)) {
            return Some(p);
        }
        through_conditioning |= consumers
            .iter()
            .any(|(node, _)| node.class.contains("conditioning"));

        frontier = consumers
            .iter()
            .filter(|(node, _)| visited.insert(node.id.clone()))
            .map(|(node, _)| node.id.clone())
            .collect();
        if frontier.is_empty() {
            break;
        }
    }

    through_conditioning.then_some(Polarity::Positive)
}

fn lexical_polarity(text: &str) -> Polarity {
    let text = text.to_lowercase();
    if NEGATIVE_WORDS.iter().any(|word| text.contains(word)) {
        Polarity::Negative
    } else {
        Polarity::Positive
    }
}
