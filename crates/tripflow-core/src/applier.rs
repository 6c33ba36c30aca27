use chrono::Duration;
use chrono::NaiveDate;
use serde_json::json;
use serde_json::Value;

use crate::document::ensure_working_memory_defaults;
use crate::document::get_array;
use crate::document::get_path;
use crate::document::get_str;
use crate::document::push_note;
use crate::document::segments;
use crate::document::set_status;
use crate::document::PatchSource;
use crate::document::Phase;
use crate::document::TripState;
use crate::patcher::patch;
use crate::patcher::PatchOutcome;
use crate::tool_registry::ToolId;

/// Adapts one tool's raw result into a patch against the canonical schema and
/// delegates it to the patcher, so invalidation always runs uniformly.
/// Status transitions happen here or in the reducer, nowhere else.
pub fn apply_tool_result(
    document: &mut Value,
    tool: ToolId,
    arguments: &Value,
    result: &Value,
) -> PatchOutcome {
    ensure_working_memory_defaults(document);
    match tool {
        ToolId::TripRequirementsExtract => apply_extraction(document, result),
        ToolId::FlightQuoteSearch => apply_flight_quotes(document, arguments, result),
        ToolId::HotelQuoteSearch => apply_hotel_quotes(document, arguments, result),
        ToolId::TripOptionRanker => apply_ranked_bundles(document, result),
        ToolId::PolicyAndRiskCheck => apply_risk_report(document, result),
        ToolId::ReservationHoldCreate => apply_holds(document, result),
        ToolId::BookingConfirmAndPurchase => apply_booking(document, result),
        ToolId::GenerateFollowupQuestions => PatchOutcome::default(),
    }
}

fn add_days(date: &str, days: i64) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => (parsed + Duration::days(days))
            .format("%Y-%m-%d")
            .to_string(),
        Err(_) => date.to_string(),
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Providers sometimes omit option ids; synthesize stable ones so selection
/// and holds can reference every option.
fn ensure_option_ids(options: &[Value], prefix: &str, index: usize) -> Vec<Value> {
    options
        .iter()
        .enumerate()
        .map(|(position, option)| {
            let Some(map) = option.as_object() else {
                return option.clone();
            };
            let existing = map
                .get("option_id")
                .or_else(|| map.get("id"))
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty());
            if existing.is_some() {
                return option.clone();
            }
            let mut enriched = map.clone();
            let option_id = format!("{prefix}{index}_{position}");
            enriched.insert("option_id".to_string(), json!(option_id));
            if prefix.starts_with("htl") && !enriched.contains_key("id") {
                enriched.insert("id".to_string(), json!(option_id));
            }
            Value::Object(enriched)
        })
        .collect()
}

fn indexed_slot(current: &[Value], index: usize, entry: Value) -> Vec<Value> {
    let mut slots = current.to_vec();
    while slots.len() <= index {
        slots.push(Value::Null);
    }
    slots[index] = entry;
    slots
}

fn apply_flight_quotes(document: &mut Value, arguments: &Value, result: &Value) -> PatchOutcome {
    let options = result
        .get("options")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let segment_index = arguments
        .get("segment_index")
        .and_then(Value::as_u64)
        .map(|index| index as usize);

    let mut wm_update = serde_json::Map::new();
    match segment_index {
        Some(index) => {
            let options = ensure_option_ids(options, "flt_seg", index);
            let current = get_array(document, "working_memory.flight_quotes_by_segment");
            let by_segment = indexed_slot(current, index, json!(options));
            if by_segment.len() == 1 && !options.is_empty() {
                wm_update.insert("flight_quotes".to_string(), json!(options));
            }
            wm_update.insert("flight_quotes_by_segment".to_string(), json!(by_segment));
        }
        None => {
            let options = ensure_option_ids(options, "flt_seg", 0);
            wm_update.insert("flight_quotes".to_string(), json!(options));
        }
    }

    let note = format!(
        "recorded flight quotes for segment {}",
        segment_index.unwrap_or(0)
    );
    patch(
        document,
        &json!({"working_memory": wm_update}),
        PatchSource::ToolResult,
        &note,
    )
}

fn apply_hotel_quotes(document: &mut Value, arguments: &Value, result: &Value) -> PatchOutcome {
    let stay_index = arguments
        .get("stay_index")
        .and_then(Value::as_u64)
        .map(|index| index as usize);

    // Results arrive either as a flat option list or grouped per room.
    let per_stay: Vec<Value> = match result.get("options_by_room").and_then(Value::as_array) {
        Some(rooms) => rooms.to_vec(),
        None => {
            let options = result
                .get("options")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            vec![json!(ensure_option_ids(
                options,
                "htl_stay",
                stay_index.unwrap_or(0)
            ))]
        }
    };
    let flatten = |rooms: &[Value]| -> Vec<Value> {
        rooms
            .iter()
            .flat_map(|room| room.as_array().cloned().unwrap_or_default())
            .collect()
    };

    let mut wm_update = serde_json::Map::new();
    match stay_index {
        Some(index) => {
            let current = get_array(document, "working_memory.hotel_quotes_by_stay");
            let by_stay = indexed_slot(current, index, json!(per_stay));
            if by_stay.len() == 1 {
                let flat = flatten(&per_stay);
                if !flat.is_empty() {
                    wm_update.insert("hotel_quotes".to_string(), json!(flat));
                }
            }
            wm_update.insert("hotel_quotes_by_stay".to_string(), json!(by_stay));
        }
        None => {
            wm_update.insert("hotel_quotes".to_string(), json!(flatten(&per_stay)));
        }
    }

    let note = format!(
        "recorded hotel quotes for stay {}",
        stay_index.unwrap_or(0)
    );
    patch(
        document,
        &json!({"working_memory": wm_update}),
        PatchSource::ToolResult,
        &note,
    )
}

fn apply_ranked_bundles(document: &mut Value, result: &Value) -> PatchOutcome {
    let bundles = result
        .get("bundles")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let count = bundles.as_array().map_or(0, Vec::len);
    patch(
        document,
        &json!({"working_memory": {"ranked_bundles": bundles}}),
        PatchSource::ToolResult,
        &format!("recorded {count} ranked bundles"),
    )
}

fn apply_risk_report(document: &mut Value, result: &Value) -> PatchOutcome {
    let mut report = result.as_object().cloned().unwrap_or_default();
    for key in ["bundle_id", "flight_option_id", "hotel_option_id"] {
        let selected = get_path(document, &format!("working_memory.selected.{key}"));
        if let Some(value) = selected.filter(|value| !value.is_null()) {
            report.insert(key.to_string(), value.clone());
        }
    }
    patch(
        document,
        &json!({"working_memory": {"risk_report": Value::Object(report)}}),
        PatchSource::ToolResult,
        "recorded policy and risk report",
    )
}

fn apply_holds(document: &mut Value, result: &Value) -> PatchOutcome {
    let holds = result.get("holds").cloned().unwrap_or_else(|| json!([]));
    let count = holds.as_array().map_or(0, Vec::len);
    let outcome = patch(
        document,
        &json!({"working_memory": {"holds": holds}}),
        PatchSource::ToolResult,
        &format!("recorded {count} reservation holds"),
    );
    set_status(document, Phase::Book, TripState::AwaitingPurchaseApproval);
    outcome
}

fn apply_booking(document: &mut Value, result: &Value) -> PatchOutcome {
    let Some(confirmation) = result.get("confirmation").filter(|c| !c.is_null()) else {
        return PatchOutcome::default();
    };
    let mut bookings = get_array(document, "working_memory.bookings").to_vec();
    bookings.push(confirmation.clone());
    let outcome = patch(
        document,
        &json!({"working_memory": {"bookings": bookings}}),
        PatchSource::ToolResult,
        "recorded booking confirmation",
    );
    set_status(document, Phase::Completed, TripState::Completed);
    outcome
}

// ---------------------------------------------------------------------------
// Extraction: loose tool fields -> canonical itinerary/party/preferences patch
// ---------------------------------------------------------------------------

fn endpoint_code(endpoint: Option<&Value>) -> Option<String> {
    match endpoint? {
        Value::String(code) if !code.is_empty() => Some(code.clone()),
        Value::Object(map) => map
            .get("code")
            .and_then(Value::as_str)
            .filter(|code| !code.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn canonical_endpoint(code: &str) -> Value {
    json!({"type": "airport", "code": code})
}

fn canonical_segment(
    segment_id: String,
    origin: Option<String>,
    destination: Option<String>,
    depart_date: Option<String>,
    transport_mode: String,
    depart_time_window: Value,
) -> Value {
    json!({
        "segment_id": segment_id,
        "origin": origin.map(|code| canonical_endpoint(&code)).unwrap_or_else(|| json!({})),
        "destination": destination.map(|code| canonical_endpoint(&code)).unwrap_or_else(|| json!({})),
        "depart_date": depart_date,
        "transport_mode": transport_mode,
        "depart_time_window": depart_time_window,
    })
}

fn build_segments(document: &Value, extracted: &Value) -> Vec<Value> {
    let existing = segments(document);
    let extracted_segments = extracted
        .get("segments")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let dates = extracted.get("dates").cloned().unwrap_or_else(|| json!({}));
    let origin = str_field(extracted, "origin");
    let destination = str_field(extracted, "destination");
    let mut segs: Vec<Value> = Vec::new();

    if !extracted_segments.is_empty() {
        let count = existing.len().max(extracted_segments.len());
        for index in 0..count {
            let from_tool = extracted_segments.get(index).cloned().unwrap_or(json!({}));
            let prior = existing.get(index).cloned().unwrap_or(json!({}));
            let origin_code = endpoint_code(from_tool.get("origin"))
                .or_else(|| str_field(&from_tool, "origin_code"))
                .or_else(|| endpoint_code(prior.get("origin")));
            let destination_code = endpoint_code(from_tool.get("destination"))
                .or_else(|| str_field(&from_tool, "destination_code"))
                .or_else(|| endpoint_code(prior.get("destination")));
            let depart_date =
                str_field(&from_tool, "depart_date").or_else(|| str_field(&prior, "depart_date"));
            let (Some(origin_code), Some(destination_code), Some(depart_date)) =
                (origin_code, destination_code, depart_date)
            else {
                continue;
            };
            let segment_id = str_field(&prior, "segment_id")
                .or_else(|| str_field(&from_tool, "segment_id"))
                .unwrap_or_else(|| format!("seg_{index}"));
            let transport_mode = str_field(&from_tool, "transport_mode")
                .or_else(|| str_field(&prior, "transport_mode"))
                .unwrap_or_else(|| "flight".to_string());
            let window = from_tool
                .get("depart_time_window")
                .or_else(|| prior.get("depart_time_window"))
                .cloned()
                .unwrap_or_else(|| json!({"start": null, "end": null}));
            segs.push(canonical_segment(
                segment_id,
                Some(origin_code),
                Some(destination_code),
                Some(depart_date),
                transport_mode,
                window,
            ));
        }
    } else if origin.is_some() || destination.is_some() {
        segs.push(canonical_segment(
            "seg_outbound".to_string(),
            origin.clone(),
            destination.clone(),
            str_field(&dates, "departure_date"),
            "flight".to_string(),
            json!({"start": null, "end": null}),
        ));
        if str_field(extracted, "trip_type").as_deref() == Some("round_trip") {
            if let (Some(origin), Some(destination), Some(return_date)) = (
                origin.clone(),
                destination.clone(),
                str_field(&dates, "return_date"),
            ) {
                segs.push(canonical_segment(
                    "seg_return".to_string(),
                    Some(destination),
                    Some(origin),
                    Some(return_date),
                    "flight".to_string(),
                    json!({"start": null, "end": null}),
                ));
            }
        }
    }

    // Open-jaw repair: if the itinerary never returns to its starting point,
    // synthesize the return leg from the return date or the last stay's
    // check-out.
    if let (Some(first), Some(last)) = (segs.first(), segs.last()) {
        let first_origin = endpoint_code(first.get("origin"));
        let last_destination = endpoint_code(last.get("destination"));
        if let (Some(first_origin), Some(last_destination)) = (first_origin, last_destination) {
            if first_origin != last_destination {
                let stays = extracted
                    .get("stays")
                    .or_else(|| extracted.get("lodging").and_then(|l| l.get("stays")))
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let return_date = str_field(&dates, "return_date")
                    .or_else(|| stays.last().and_then(|stay| str_field(stay, "check_out")));
                segs.push(canonical_segment(
                    "seg_return".to_string(),
                    Some(last_destination),
                    Some(first_origin),
                    return_date,
                    "flight".to_string(),
                    json!({"start": null, "end": null}),
                ));
            }
        }
    }

    segs
}

fn canonical_stay(stay: &Value, prior: Option<&Value>) -> Value {
    let pick = |key: &str| {
        str_field(stay, key).or_else(|| prior.and_then(|prior| str_field(prior, key)))
    };
    let location = str_field(stay, "location_code")
        .or_else(|| str_field(stay, "destination"))
        .or_else(|| prior.and_then(|prior| str_field(prior, "location_code")))
        .or_else(|| prior.and_then(|prior| str_field(prior, "destination")));
    let check_in = pick("check_in");
    let mut check_out = pick("check_out");
    // A shortened window never collapses an existing multi-night stay to zero.
    if let (Some(check_in), Some(out)) = (check_in.as_deref(), check_out.as_deref()) {
        if out <= check_in {
            if let Some(prior_out) = prior.and_then(|prior| str_field(prior, "check_out")) {
                if prior_out.as_str() > check_in {
                    check_out = Some(prior_out);
                }
            }
        }
    }
    json!({
        "location_code": location,
        "check_in": check_in,
        "check_out": check_out,
        "location_hint": pick("location_hint"),
    })
}

fn build_lodging(document: &Value, extracted: &Value) -> Value {
    let lodging_from_tool = extracted.get("lodging").cloned().unwrap_or_else(|| json!({}));
    let dates = extracted.get("dates").cloned().unwrap_or_else(|| json!({}));
    let mut lodging = serde_json::Map::new();
    if let Some(needed) = lodging_from_tool.get("needed").and_then(Value::as_bool) {
        lodging.insert("needed".to_string(), json!(needed));
    }

    let extracted_stays = extracted
        .get("stays")
        .or_else(|| lodging_from_tool.get("stays"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let mut existing_stays = get_array(document, "itinerary.lodging.stays").to_vec();
    if existing_stays.is_empty() {
        let check_in = get_str(document, "itinerary.lodging.check_in");
        let check_out = get_str(document, "itinerary.lodging.check_out");
        if check_in.is_some() || check_out.is_some() {
            let destination = segments(document)
                .first()
                .and_then(|segment| endpoint_code(segment.get("destination")));
            existing_stays = vec![json!({
                "location_code": destination,
                "check_in": check_in,
                "check_out": check_out,
            })];
        }
    }

    if !extracted_stays.is_empty() {
        let count = extracted_stays.len().max(existing_stays.len());
        let stays: Vec<Value> = (0..count)
            .map(|index| {
                let stay = extracted_stays.get(index).cloned().unwrap_or(json!({}));
                canonical_stay(&stay, existing_stays.get(index))
            })
            .collect();
        lodging.insert("stays".to_string(), json!(stays));
    } else {
        // Single lodging window; dates default from the trip dates.
        if let Some(departure) = str_field(&dates, "departure_date") {
            lodging.insert("check_in".to_string(), json!(departure));
        }
        if let Some(return_date) = str_field(&dates, "return_date") {
            lodging.insert("check_out".to_string(), json!(return_date));
        }
        if let Some(check_in) = str_field(&lodging_from_tool, "check_in") {
            lodging.insert("check_in".to_string(), json!(check_in));
        }
        if let Some(check_out) = str_field(&lodging_from_tool, "check_out") {
            lodging.insert("check_out".to_string(), json!(check_out));
        }
    }
    if let Some(hint) = lodging_from_tool.get("location_hint") {
        lodging.insert("location_hint".to_string(), hint.clone());
    }
    Value::Object(lodging)
}

fn build_flight_preferences(extracted: &Value) -> Value {
    let mut flight = serde_json::Map::new();
    if let Some(cabin) = str_field(extracted, "cabin") {
        flight.insert("cabin".to_string(), json!(cabin));
    }
    let constraints = extracted
        .get("constraints")
        .cloned()
        .unwrap_or_else(|| json!({}));
    for key in ["max_stops", "avoid_red_eye", "preferred_airlines"] {
        if let Some(value) = constraints.get(key) {
            flight.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(flight)
}

fn extraction_note(extracted: &Value, missing: &[Value]) -> String {
    let mut parts = Vec::new();
    if let Some(origin) = str_field(extracted, "origin") {
        parts.push(format!("origin {origin}"));
    }
    if let Some(destination) = str_field(extracted, "destination") {
        parts.push(format!("destination {destination}"));
    }
    if let Some(dates) = extracted.get("dates") {
        if let Some(departure) = str_field(dates, "departure_date") {
            parts.push(format!("departing {departure}"));
        }
        if let Some(return_date) = str_field(dates, "return_date") {
            parts.push(format!("returning {return_date}"));
        }
    }
    if let Some(adults) = get_path(extracted, "travelers.adults").and_then(Value::as_i64) {
        parts.push(format!("{adults} adults"));
    }
    if missing.is_empty() {
        parts.push("nothing missing".to_string());
    } else {
        parts.push(format!("{} fields still missing", missing.len()));
    }
    format!("applied extracted requirements: {}", parts.join(", "))
}

/// Stays must cover at least one night. When a zero-night window slips
/// through, push check-out a day and keep the following segment's departure
/// aligned with it.
fn min_stay_repair(document: &Value) -> Option<Value> {
    let stays = get_array(document, "itinerary.lodging.stays");
    let segs = segments(document);
    if stays.is_empty() {
        return None;
    }
    let mut repaired_stays = stays.to_vec();
    let mut repaired_segments = segs.to_vec();
    let mut repaired = false;
    for (index, stay) in stays.iter().enumerate() {
        let (Some(check_in), Some(check_out)) =
            (str_field(stay, "check_in"), str_field(stay, "check_out"))
        else {
            continue;
        };
        if check_out > check_in {
            continue;
        }
        let new_check_out = add_days(&check_in, 1);
        if let Some(stay) = repaired_stays[index].as_object_mut() {
            stay.insert("check_out".to_string(), json!(new_check_out));
        }
        if let Some(next) = repaired_segments
            .get_mut(index + 1)
            .and_then(Value::as_object_mut)
        {
            next.insert("depart_date".to_string(), json!(new_check_out));
        }
        repaired = true;
    }
    repaired.then(|| {
        json!({
            "itinerary": {
                "segments": repaired_segments,
                "lodging": {"stays": repaired_stays},
            },
        })
    })
}

fn apply_extraction(document: &mut Value, result: &Value) -> PatchOutcome {
    let extracted = result
        .get("trip_intent")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let missing = result
        .get("missing_required_fields")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut update = serde_json::Map::new();
    update.insert(
        "status".to_string(),
        json!({"missing_required": missing}),
    );

    if let Some(travelers) = extracted.get("travelers").and_then(Value::as_object) {
        let mut merged = get_path(document, "party.travelers")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        for (key, value) in travelers {
            if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
        if !merged.is_empty() {
            update.insert("party".to_string(), json!({"travelers": merged}));
        }
    }

    let mut itinerary = serde_json::Map::new();
    if let Some(trip_type) = str_field(&extracted, "trip_type") {
        itinerary.insert("trip_type".to_string(), json!(trip_type));
    }
    let segs = build_segments(document, &extracted);
    if !segs.is_empty() {
        itinerary.insert("segments".to_string(), json!(segs));
    }
    itinerary.insert("lodging".to_string(), build_lodging(document, &extracted));
    update.insert("itinerary".to_string(), Value::Object(itinerary));

    let flight_preferences = build_flight_preferences(&extracted);
    if flight_preferences
        .as_object()
        .map_or(false, |prefs| !prefs.is_empty())
    {
        update.insert(
            "preferences".to_string(),
            json!({"flight": flight_preferences}),
        );
    }

    let note = extraction_note(&extracted, &missing);
    let mut outcome = patch(
        document,
        &Value::Object(update),
        PatchSource::ToolResult,
        &note,
    );

    if let Some(repair) = min_stay_repair(document) {
        let repair_outcome = patch(
            document,
            &repair,
            PatchSource::AgentAssumption,
            "extended stay to a one-night minimum",
        );
        outcome.changed_paths.extend(repair_outcome.changed_paths);
        outcome.changed_paths.sort();
        outcome.changed_paths.dedup();
    }

    if let Some(questions) = result
        .get("clarifying_questions")
        .and_then(Value::as_array)
        .filter(|questions| !questions.is_empty())
    {
        let rendered: Vec<&str> = questions.iter().filter_map(Value::as_str).collect();
        push_note(
            document,
            &format!("[clarifying_questions] {}", rendered.join(" | ")),
        );
    }

    if missing.is_empty() {
        set_status(document, Phase::Intake, TripState::ReadyToQuote);
    } else {
        set_status(document, Phase::Intake, TripState::CollectingRequirements);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::document::get_array;
    use crate::document::get_path;
    use crate::document::get_str;
    use crate::document::missing_required_for_quotes;
    use crate::document::new_trip_intent;
    use crate::document::trip_state;

    use super::*;

    #[test]
    fn extraction_builds_round_trip_and_lodging_window() {
        let mut document = new_trip_intent("trip_1", "4 people EWR to DEN");
        let result = json!({
            "trip_intent": {
                "origin": "EWR",
                "destination": "DEN",
                "trip_type": "round_trip",
                "dates": {"departure_date": "2026-01-30", "return_date": "2026-02-02"},
                "travelers": {"adults": 4},
            },
            "missing_required_fields": [],
            "clarifying_questions": [],
        });
        apply_tool_result(
            &mut document,
            ToolId::TripRequirementsExtract,
            &json!({}),
            &result,
        );

        assert_eq!(
            get_path(&document, "party.travelers.adults"),
            Some(&json!(4))
        );
        let segs = get_array(&document, "itinerary.segments");
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0]["origin"]["code"], json!("EWR"));
        assert_eq!(segs[0]["destination"]["code"], json!("DEN"));
        assert_eq!(segs[1]["origin"]["code"], json!("DEN"));
        assert_eq!(segs[1]["destination"]["code"], json!("EWR"));
        assert_eq!(
            get_str(&document, "itinerary.lodging.check_in"),
            Some("2026-01-30")
        );
        assert_eq!(
            get_str(&document, "itinerary.lodging.check_out"),
            Some("2026-02-02")
        );
        assert_eq!(missing_required_for_quotes(&document), Vec::<String>::new());
        assert_eq!(trip_state(&document), Some(TripState::ReadyToQuote));
    }

    #[test]
    fn extraction_with_missing_fields_stays_in_collecting() {
        let mut document = new_trip_intent("trip_1", "somewhere warm");
        let result = json!({
            "trip_intent": {"destination": "MIA"},
            "missing_required_fields": ["itinerary.segments[0].origin.code"],
            "clarifying_questions": ["Where are you flying from?"],
        });
        apply_tool_result(
            &mut document,
            ToolId::TripRequirementsExtract,
            &json!({}),
            &result,
        );
        assert_eq!(trip_state(&document), Some(TripState::CollectingRequirements));
        let notes = get_array(&document, "status.notes");
        assert!(notes
            .iter()
            .filter_map(Value::as_str)
            .any(|note| note.contains("clarifying_questions")));
    }

    #[test]
    fn extraction_synthesizes_open_jaw_return_leg() {
        let mut document = new_trip_intent("trip_1", "");
        let result = json!({
            "trip_intent": {
                "segments": [
                    {"origin": "EWR", "destination": "DEN", "depart_date": "2026-06-01"},
                    {"origin": "DEN", "destination": "SLC", "depart_date": "2026-06-03"},
                ],
                "stays": [
                    {"location_code": "DEN", "check_in": "2026-06-01", "check_out": "2026-06-03"},
                    {"location_code": "SLC", "check_in": "2026-06-03", "check_out": "2026-06-05"},
                ],
                "travelers": {"adults": 2},
            },
            "missing_required_fields": [],
        });
        apply_tool_result(
            &mut document,
            ToolId::TripRequirementsExtract,
            &json!({}),
            &result,
        );
        let segs = get_array(&document, "itinerary.segments");
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[2]["origin"]["code"], json!("SLC"));
        assert_eq!(segs[2]["destination"]["code"], json!("EWR"));
        assert_eq!(segs[2]["depart_date"], json!("2026-06-05"));
    }

    #[test]
    fn extraction_repairs_zero_night_stay() {
        let mut document = new_trip_intent("trip_1", "");
        let result = json!({
            "trip_intent": {
                "segments": [
                    {"origin": "EWR", "destination": "DEN", "depart_date": "2026-06-01"},
                    {"origin": "DEN", "destination": "EWR", "depart_date": "2026-06-01"},
                ],
                "stays": [
                    {"location_code": "DEN", "check_in": "2026-06-01", "check_out": "2026-06-01"},
                ],
                "travelers": {"adults": 1},
            },
            "missing_required_fields": [],
        });
        apply_tool_result(
            &mut document,
            ToolId::TripRequirementsExtract,
            &json!({}),
            &result,
        );
        let stays = get_array(&document, "itinerary.lodging.stays");
        assert_eq!(stays[0]["check_out"], json!("2026-06-02"));
        let segs = get_array(&document, "itinerary.segments");
        assert_eq!(segs[1]["depart_date"], json!("2026-06-02"));
    }

    #[test]
    fn flight_quotes_land_in_segment_slot_with_null_padding() {
        let mut document = new_trip_intent("trip_1", "");
        let result = json!({"options": [{"total_price": 420.0}]});
        apply_tool_result(
            &mut document,
            ToolId::FlightQuoteSearch,
            &json!({"segment_index": 1}),
            &result,
        );
        let by_segment = get_array(&document, "working_memory.flight_quotes_by_segment");
        assert_eq!(by_segment.len(), 2);
        assert_eq!(by_segment[0], Value::Null);
        assert_eq!(by_segment[1][0]["option_id"], json!("flt_seg1_0"));
        // Multi-segment trip: no flat mirror.
        assert_eq!(get_array(&document, "working_memory.flight_quotes").len(), 0);
    }

    #[test]
    fn single_segment_flight_quotes_mirror_to_flat_slot() {
        let mut document = new_trip_intent("trip_1", "");
        let result = json!({"options": [{"option_id": "flt_a"}, {"option_id": "flt_b"}]});
        apply_tool_result(
            &mut document,
            ToolId::FlightQuoteSearch,
            &json!({"segment_index": 0}),
            &result,
        );
        assert_eq!(get_array(&document, "working_memory.flight_quotes").len(), 2);
        assert_eq!(
            get_array(&document, "working_memory.flight_quotes_by_segment").len(),
            1
        );
    }

    #[test]
    fn hotel_rooms_flatten_into_flat_slot_for_single_stay() {
        let mut document = new_trip_intent("trip_1", "");
        let result = json!({
            "options_by_room": [
                [{"option_id": "htl_a"}],
                [{"option_id": "htl_b"}],
            ],
        });
        apply_tool_result(
            &mut document,
            ToolId::HotelQuoteSearch,
            &json!({"stay_index": 0}),
            &result,
        );
        let flat = get_array(&document, "working_memory.hotel_quotes");
        assert_eq!(flat.len(), 2);
        let by_stay = get_array(&document, "working_memory.hotel_quotes_by_stay");
        assert_eq!(by_stay.len(), 1);
        assert_eq!(by_stay[0].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn risk_report_carries_selected_ids() {
        let mut document = new_trip_intent("trip_1", "");
        document["working_memory"]["selected"]["bundle_id"] = json!("bndl_1");
        document["working_memory"]["selected"]["flight_option_id"] = json!("flt_a");
        apply_tool_result(
            &mut document,
            ToolId::PolicyAndRiskCheck,
            &json!({}),
            &json!({"risks": ["non_refundable_fare"], "blocking_issues": []}),
        );
        assert_eq!(
            get_str(&document, "working_memory.risk_report.bundle_id"),
            Some("bndl_1")
        );
        assert_eq!(
            get_str(&document, "working_memory.risk_report.flight_option_id"),
            Some("flt_a")
        );
    }

    #[test]
    fn holds_advance_status_to_awaiting_approval() {
        let mut document = new_trip_intent("trip_1", "");
        apply_tool_result(
            &mut document,
            ToolId::ReservationHoldCreate,
            &json!({}),
            &json!({"holds": [{"hold_id": "hold_1", "status": "held"}]}),
        );
        assert_eq!(get_str(&document, "status.phase"), Some("book"));
        assert_eq!(
            trip_state(&document),
            Some(TripState::AwaitingPurchaseApproval)
        );
        assert_eq!(get_array(&document, "working_memory.holds").len(), 1);
    }

    #[test]
    fn booking_confirmation_completes_the_trip() {
        let mut document = new_trip_intent("trip_1", "");
        apply_tool_result(
            &mut document,
            ToolId::BookingConfirmAndPurchase,
            &json!({}),
            &json!({"confirmation": {"status": "ticketed", "locator": "TF9QKX"}}),
        );
        assert_eq!(get_str(&document, "status.phase"), Some("completed"));
        assert_eq!(trip_state(&document), Some(TripState::Completed));
        let bookings = get_array(&document, "working_memory.bookings");
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0]["locator"], json!("TF9QKX"));
    }
}
