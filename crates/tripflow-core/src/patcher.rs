use std::collections::BTreeSet;

use serde_json::json;
use serde_json::Map;
use serde_json::Value;

use crate::document::empty_selection;
use crate::document::ensure_working_memory_defaults;
use crate::document::get_array;
use crate::document::lodging_needed;
use crate::document::push_note;
use crate::document::touch;
use crate::document::PatchSource;
use crate::tool_registry::ToolId;

const FLIGHT_INPUT_PREFIXES: [&str; 3] =
    ["itinerary.segments", "preferences.flight", "party.travelers"];
const HOTEL_INPUT_PREFIXES: [&str; 2] = ["itinerary.lodging", "preferences.hotel"];
const POLICY_INPUT_PREFIXES: [&str; 2] = ["policy", "constraints"];
const HOLD_SENSITIVE_PATHS: [&str; 2] =
    ["constraints.budget_total", "constraints.refundable_preference"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidations {
    pub cleared: Vec<String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchOutcome {
    pub changed_paths: Vec<String>,
    pub invalidations: Invalidations,
    pub suggested_next_actions: Vec<ToolId>,
}

/// Merges a partial update into the document, records changed paths, runs the
/// invalidation rules, and stamps a source-tagged note. Working-memory
/// defaults are re-established before anything else so invalidation never
/// observes a missing slot.
pub fn patch(
    document: &mut Value,
    update: &Value,
    source: PatchSource,
    note: &str,
) -> PatchOutcome {
    debug_assert!(update.is_object(), "patch must be a mapping");
    ensure_working_memory_defaults(document);

    let before = document.clone();
    deep_merge(document, update);
    if !note.is_empty() {
        push_note(document, &format!("[{}] {note}", source.as_str()));
    }

    let mut changed_paths = Vec::new();
    compute_changed_paths(&before, document, "", &mut changed_paths);
    changed_paths.sort();

    let invalidations = invalidate_caches(document, &changed_paths);
    let suggested_next_actions = suggest_next_actions(document, &changed_paths);
    touch(document);

    PatchOutcome {
        changed_paths,
        invalidations,
        suggested_next_actions,
    }
}

/// Mapping values merge key-by-key; everything else (scalars, lists, type
/// changes) is a full replacement at that key.
pub fn deep_merge(target: &mut Value, update: &Value) {
    let Some(update_map) = update.as_object() else {
        *target = update.clone();
        return;
    };
    if !target.is_object() {
        *target = update.clone();
        return;
    }
    let Some(target_map) = target.as_object_mut() else {
        return;
    };
    for (key, value) in update_map {
        match target_map.get_mut(key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                deep_merge(existing, value);
            }
            _ => {
                target_map.insert(key.clone(), value.clone());
            }
        }
    }
}

fn value_kind(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn changed_path(prefix: &str) -> String {
    if prefix.is_empty() {
        "$".to_string()
    } else {
        prefix.to_string()
    }
}

/// Dotted-path diff. Mappings recurse per key; lists and scalars are atomic,
/// so any element-level change reports the list's own path.
pub fn compute_changed_paths(before: &Value, after: &Value, prefix: &str, out: &mut Vec<String>) {
    if value_kind(before) != value_kind(after) {
        out.push(changed_path(prefix));
        return;
    }
    match (before, after) {
        (Value::Object(before_map), Value::Object(after_map)) => {
            let keys: BTreeSet<&String> =
                before_map.keys().chain(after_map.keys()).collect();
            for key in keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match (before_map.get(key), after_map.get(key)) {
                    (Some(before_value), Some(after_value)) => {
                        compute_changed_paths(before_value, after_value, &path, out);
                    }
                    _ => out.push(path),
                }
            }
        }
        _ => {
            if before != after {
                out.push(changed_path(prefix));
            }
        }
    }
}

fn any_starts_with(changed_paths: &[String], prefixes: &[&str]) -> bool {
    changed_paths
        .iter()
        .any(|path| prefixes.iter().any(|prefix| path.starts_with(prefix)))
}

fn clear_key(
    wm: &mut Map<String, Value>,
    key: &str,
    reason: &str,
    invalidations: &mut Invalidations,
) {
    let Some(slot) = wm.get_mut(key) else {
        return;
    };
    *slot = if slot.is_array() { json!([]) } else { Value::Null };
    invalidations.cleared.push(format!("working_memory.{key}"));
    invalidations.reasons.push(reason.to_string());
}

fn clear_selection(wm: &mut Map<String, Value>, reason: &str, invalidations: &mut Invalidations) {
    wm.insert("selected".to_string(), empty_selection());
    invalidations
        .cleared
        .push("working_memory.selected".to_string());
    invalidations.reasons.push(reason.to_string());
}

/// Ordered, independent rules; several may fire for one patch. Clearing a
/// cache clears the pointers that depended on it in the same pass.
fn invalidate_caches(document: &mut Value, changed_paths: &[String]) -> Invalidations {
    let mut invalidations = Invalidations::default();
    let Some(wm) = document
        .get_mut("working_memory")
        .and_then(Value::as_object_mut)
    else {
        return invalidations;
    };

    if any_starts_with(changed_paths, &FLIGHT_INPUT_PREFIXES) {
        clear_key(wm, "flight_quotes", "flight inputs changed; cleared flight quotes", &mut invalidations);
        clear_key(wm, "flight_quotes_by_segment", "flight inputs changed; cleared flight quotes by segment", &mut invalidations);
        clear_key(wm, "ranked_bundles", "flight inputs changed; cleared ranked bundles", &mut invalidations);
        clear_key(wm, "risk_report", "flight inputs changed; cleared risk report", &mut invalidations);
        clear_key(wm, "holds", "flight inputs changed; cleared holds", &mut invalidations);
        clear_selection(wm, "selection cleared; flight-derived artifacts are stale", &mut invalidations);
    }

    if any_starts_with(changed_paths, &HOTEL_INPUT_PREFIXES) {
        clear_key(wm, "hotel_quotes", "hotel inputs changed; cleared hotel quotes", &mut invalidations);
        clear_key(wm, "hotel_quotes_by_stay", "hotel inputs changed; cleared hotel quotes by stay", &mut invalidations);
        clear_key(wm, "ranked_bundles", "hotel inputs changed; cleared ranked bundles", &mut invalidations);
        clear_key(wm, "risk_report", "hotel inputs changed; cleared risk report", &mut invalidations);
        clear_key(wm, "holds", "hotel inputs changed; cleared holds", &mut invalidations);
        clear_selection(wm, "selection cleared; hotel-derived artifacts are stale", &mut invalidations);
    }

    if any_starts_with(changed_paths, &POLICY_INPUT_PREFIXES) {
        if wm.get("risk_report").map_or(false, |slot| !slot.is_null()) {
            clear_key(wm, "risk_report", "policy or constraints changed; cleared risk report", &mut invalidations);
        }
        let holds_sensitive = changed_paths.iter().any(|path| {
            HOLD_SENSITIVE_PATHS
                .iter()
                .any(|sensitive| path.starts_with(sensitive))
        });
        if holds_sensitive
            && wm
                .get("holds")
                .and_then(Value::as_array)
                .map_or(false, |holds| !holds.is_empty())
        {
            clear_key(wm, "holds", "budget or refundability changed; cleared holds", &mut invalidations);
        }
    }

    invalidations
}

/// Advisory only; the reducer stays the sole authority on what runs next.
fn suggest_next_actions(document: &Value, changed_paths: &[String]) -> Vec<ToolId> {
    let mut suggestions = Vec::new();
    let changed = |prefix: &str| changed_paths.iter().any(|path| path.starts_with(prefix));
    let flight_quotes = get_array(document, "working_memory.flight_quotes");
    let hotel_quotes = get_array(document, "working_memory.hotel_quotes");

    if changed("itinerary.") || changed("party.travelers") {
        if flight_quotes.is_empty() {
            suggestions.push(ToolId::FlightQuoteSearch);
        }
        if lodging_needed(document) && hotel_quotes.is_empty() {
            suggestions.push(ToolId::HotelQuoteSearch);
        }
    }

    if !flight_quotes.is_empty()
        && (!lodging_needed(document) || !hotel_quotes.is_empty())
        && get_array(document, "working_memory.ranked_bundles").is_empty()
    {
        suggestions.push(ToolId::TripOptionRanker);
    }

    suggestions
}
