use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use crate::document::blocking_issues;
use crate::document::ensure_working_memory_defaults;
use crate::document::effective_stays;
use crate::document::flight_segment_indices;
use crate::document::get_array;
use crate::document::get_path;
use crate::document::get_str;
use crate::document::intent_summary;
use crate::document::lodging_needed;
use crate::document::missing_required_for_quotes;
use crate::document::push_note;
use crate::document::segments;
use crate::document::set_status;
use crate::document::touch;
use crate::document::PatchSource;
use crate::document::Phase;
use crate::document::TripState;
use crate::patcher::patch;
use crate::tool_registry::ToolId;

/// Everything that can advance a trip. Tool results and errors are events like
/// any user input, so one reducer sees the whole timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripEvent {
    UserMessage {
        text: String,
    },
    UserSelectedBundle {
        bundle_id: String,
    },
    UserRequestHold,
    UserApprovedPurchase {
        approval_token: String,
        payment_method_id: String,
    },
    IntentReady,
    ToolResult {
        tool_name: String,
        result: Value,
    },
    ToolError {
        tool_name: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: ToolId,
    pub arguments: Value,
}

/// Output of one reduction. Holds at most one tool call; the caller executes
/// it and feeds the result back as the next event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reduction {
    pub tool_calls: Vec<ToolCall>,
    pub messages: Vec<String>,
}

impl Reduction {
    fn message(text: impl Into<String>) -> Self {
        Reduction {
            tool_calls: Vec::new(),
            messages: vec![text.into()],
        }
    }

    fn call(tool: ToolId, arguments: Value) -> Self {
        Reduction {
            tool_calls: vec![ToolCall { tool, arguments }],
            messages: Vec::new(),
        }
    }
}

pub fn reduce(document: &mut Value, event: &TripEvent) -> Reduction {
    ensure_working_memory_defaults(document);
    match event {
        TripEvent::UserMessage { text } => reduce_user_message(document, text),
        TripEvent::UserSelectedBundle { bundle_id } => reduce_bundle_selection(document, bundle_id),
        TripEvent::UserRequestHold => reduce_hold_request(document),
        TripEvent::UserApprovedPurchase {
            approval_token,
            payment_method_id,
        } => reduce_purchase_approval(document, approval_token, payment_method_id),
        TripEvent::ToolError { tool_name, error } => reduce_tool_error(document, tool_name, error),
        TripEvent::IntentReady => reduce_pipeline(document, true),
        TripEvent::ToolResult { .. } => reduce_pipeline(document, false),
    }
}

fn set_missing_required(document: &mut Value, missing: &[String]) {
    if let Some(status) = document
        .get_mut("status")
        .and_then(Value::as_object_mut)
    {
        status.insert("missing_required".to_string(), json!(missing));
    }
}

fn reduce_user_message(document: &mut Value, text: &str) -> Reduction {
    if let Some(status) = document
        .get_mut("status")
        .and_then(Value::as_object_mut)
    {
        status.remove("last_tool_error");
    }
    set_status(document, Phase::Intake, TripState::CollectingRequirements);
    touch(document);
    // Extraction is the only work done for a raw message; everything else
    // waits for its result.
    Reduction::call(
        ToolId::TripRequirementsExtract,
        json!({
            "user_message": text,
            "context": {
                "timezone": get_str(document, "request.timezone").unwrap_or("UTC"),
                "current_intent": intent_summary(document),
            },
        }),
    )
}

fn reduce_tool_error(document: &mut Value, tool_name: &str, error: &str) -> Reduction {
    set_status(document, Phase::Error, TripState::Retryable);
    if let Some(status) = document
        .get_mut("status")
        .and_then(Value::as_object_mut)
    {
        status.insert(
            "last_tool_error".to_string(),
            json!({
                "tool_name": tool_name,
                "error": error,
                "at": chrono::Utc::now().to_rfc3339(),
            }),
        );
    }
    push_note(
        document,
        &format!(
            "[tool_error] {tool_name} failed: {error}. Say 'try again' or send a new message to re-run."
        ),
    );
    touch(document);
    Reduction::message(format!("Tool error: {tool_name}: {error}"))
}

fn find_option<'a>(pools: &[&'a [Value]], option_id: &str) -> Option<&'a Value> {
    for pool in pools {
        for option in *pool {
            let id = option
                .get("option_id")
                .or_else(|| option.get("id"))
                .and_then(Value::as_str);
            if id == Some(option_id) {
                return Some(option);
            }
        }
    }
    None
}

fn flight_pools(document: &Value) -> Vec<Vec<Value>> {
    let mut pools = vec![get_array(document, "working_memory.flight_quotes").to_vec()];
    for per_segment in get_array(document, "working_memory.flight_quotes_by_segment") {
        pools.push(per_segment.as_array().cloned().unwrap_or_default());
    }
    pools
}

fn hotel_pools(document: &Value) -> Vec<Vec<Value>> {
    let mut pools = vec![get_array(document, "working_memory.hotel_quotes").to_vec()];
    for per_stay in get_array(document, "working_memory.hotel_quotes_by_stay") {
        for room in per_stay.as_array().map(Vec::as_slice).unwrap_or(&[]) {
            pools.push(room.as_array().cloned().unwrap_or_default());
        }
    }
    pools
}

fn id_list(bundle: &Value, plural: &str, singular: &str) -> Vec<String> {
    let ids: Vec<String> = bundle
        .get(plural)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    if !ids.is_empty() {
        return ids;
    }
    bundle
        .get(singular)
        .and_then(Value::as_str)
        .map(str::to_string)
        .into_iter()
        .collect()
}

fn reduce_bundle_selection(document: &mut Value, bundle_id: &str) -> Reduction {
    let bundle = get_array(document, "working_memory.ranked_bundles")
        .iter()
        .find(|bundle| bundle.get("bundle_id").and_then(Value::as_str) == Some(bundle_id))
        .cloned();
    let Some(bundle) = bundle else {
        return Reduction::message(format!(
            "Unknown bundle id {bundle_id}. Reply with one of the listed bundle ids."
        ));
    };

    let flight_ids = id_list(&bundle, "flight_option_ids", "flight_option_id");
    let hotel_ids = id_list(&bundle, "hotel_option_ids", "hotel_option_id");
    let selected = json!({
        "bundle_id": bundle_id,
        "flight_option_id": flight_ids.first().cloned(),
        "hotel_option_id": hotel_ids.first().cloned(),
        "flight_option_ids": flight_ids,
        "hotel_option_ids": hotel_ids,
    });
    patch(
        document,
        &json!({"working_memory": {"selected": selected}}),
        PatchSource::UserMessage,
        &format!("user selected bundle {bundle_id}"),
    );
    set_status(document, Phase::Quote, TripState::RiskChecking);

    let flight_ids = id_list(&bundle, "flight_option_ids", "flight_option_id");
    let hotel_ids = id_list(&bundle, "hotel_option_ids", "hotel_option_id");
    let flight_pools = flight_pools(document);
    let flight_pools: Vec<&[Value]> = flight_pools.iter().map(Vec::as_slice).collect();
    let hotel_pools = hotel_pools(document);
    let hotel_pools: Vec<&[Value]> = hotel_pools.iter().map(Vec::as_slice).collect();
    let selected_flights: Vec<Value> = flight_ids
        .iter()
        .filter_map(|id| find_option(&flight_pools, id).cloned())
        .collect();
    let selected_hotels: Vec<Value> = hotel_ids
        .iter()
        .filter_map(|id| find_option(&hotel_pools, id).cloned())
        .collect();

    Reduction::call(
        ToolId::PolicyAndRiskCheck,
        json!({
            "trip_intent": intent_summary(document),
            "selected_flight": selected_flights.first().cloned(),
            "selected_hotel": selected_hotels.first().cloned(),
            "selected_flights": selected_flights,
            "selected_hotels": selected_hotels,
            "org_policy": get_path(document, "policy.rules").cloned().unwrap_or_else(|| json!({})),
        }),
    )
}

fn reduce_hold_request(document: &mut Value) -> Reduction {
    let Some(bundle_id) =
        get_str(document, "working_memory.selected.bundle_id").map(str::to_string)
    else {
        return Reduction::message("Please pick a bundle_id first.");
    };
    if !blocking_issues(document).is_empty() {
        return Reduction::message(
            "I can't place holds because the selected bundle has blocking policy issues.",
        );
    }

    let traveler_profile_ids = get_array(document, "party.traveler_profile_ids").to_vec();
    let mut items = Vec::new();
    for id in id_list(
        get_path(document, "working_memory.selected").unwrap_or(&Value::Null),
        "flight_option_ids",
        "flight_option_id",
    ) {
        items.push(json!({
            "item_type": "flight",
            "option_id": id,
            "traveler_profile_ids": traveler_profile_ids,
        }));
    }
    for id in id_list(
        get_path(document, "working_memory.selected").unwrap_or(&Value::Null),
        "hotel_option_ids",
        "hotel_option_id",
    ) {
        items.push(json!({
            "item_type": "hotel",
            "option_id": id,
            "traveler_profile_ids": traveler_profile_ids,
        }));
    }
    if items.is_empty() {
        return Reduction::message(
            "Missing selected flight/hotel option ids. Please select the bundle again.",
        );
    }

    set_status(document, Phase::Hold, TripState::CreatingHolds);
    touch(document);
    let trip_id = get_str(document, "trip_id").unwrap_or_default();
    Reduction::call(
        ToolId::ReservationHoldCreate,
        json!({
            "idempotency_key": format!("hold_{trip_id}_{bundle_id}"),
            "items": items,
        }),
    )
}

fn reduce_purchase_approval(
    document: &mut Value,
    approval_token: &str,
    payment_method_id: &str,
) -> Reduction {
    let hold_ids: Vec<String> = get_array(document, "working_memory.holds")
        .iter()
        .filter(|hold| hold.get("status").and_then(Value::as_str) == Some("held"))
        .filter_map(|hold| hold.get("hold_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if hold_ids.is_empty() {
        return Reduction::message(
            "No active holds found. Say 'hold' first, then approve purchase.",
        );
    }
    let trip_id = get_str(document, "trip_id").unwrap_or_default();
    Reduction::call(
        ToolId::BookingConfirmAndPurchase,
        json!({
            "idempotency_key": format!("purchase_{trip_id}"),
            "approval_token": approval_token,
            "hold_ids": hold_ids,
            "payment_method_id": payment_method_id,
            "contact_email": get_str(document, "party.contact.email"),
        }),
    )
}

fn cached_flight_quotes(document: &Value, index: usize) -> bool {
    let by_segment = get_array(document, "working_memory.flight_quotes_by_segment");
    let slot = by_segment
        .get(index)
        .and_then(Value::as_array)
        .map_or(false, |options| !options.is_empty());
    if slot {
        return true;
    }
    index == 0
        && by_segment.len() <= 1
        && !get_array(document, "working_memory.flight_quotes").is_empty()
}

fn cached_hotel_quotes(document: &Value, index: usize, stay_count: usize) -> bool {
    let by_stay = get_array(document, "working_memory.hotel_quotes_by_stay");
    let slot = by_stay
        .get(index)
        .and_then(Value::as_array)
        .map_or(false, |rooms| !rooms.is_empty());
    if slot {
        return true;
    }
    index == 0
        && stay_count == 1
        && !get_array(document, "working_memory.hotel_quotes").is_empty()
}

fn flight_search_call(document: &Value, index: usize) -> Option<ToolCall> {
    let segment = segments(document).get(index)?;
    let origin = segment.get("origin")?.get("code")?.as_str()?.to_string();
    let destination = segment
        .get("destination")?
        .get("code")?
        .as_str()?
        .to_string();
    let departure_date = segment.get("depart_date")?.as_str()?.to_string();
    let prefs = get_path(document, "preferences.flight")
        .cloned()
        .unwrap_or_else(|| json!({}));
    Some(ToolCall {
        tool: ToolId::FlightQuoteSearch,
        arguments: json!({
            "origin": origin,
            "destination": destination,
            "departure_date": departure_date,
            "trip_type": "one_way",
            "travelers": get_path(document, "party.travelers").cloned().unwrap_or_else(|| json!({})),
            "cabin": prefs.get("cabin").and_then(Value::as_str).unwrap_or("economy"),
            "constraints": {
                "max_stops": prefs.get("max_stops").cloned().unwrap_or(json!(1)),
                "avoid_red_eye": prefs.get("avoid_red_eye").cloned().unwrap_or(json!(false)),
                "preferred_airlines": prefs.get("preferred_airlines").cloned().unwrap_or(json!([])),
            },
            "result_limit": 10,
            "segment_index": index,
        }),
    })
}

fn hotel_search_call(document: &Value, index: usize) -> Option<ToolCall> {
    let stay = effective_stays(document).into_iter().nth(index)?;
    let prefs = get_path(document, "preferences.hotel")
        .cloned()
        .unwrap_or_else(|| json!({}));
    Some(ToolCall {
        tool: ToolId::HotelQuoteSearch,
        arguments: json!({
            "destination": stay.location_code,
            "stay_index": index,
            "dates": {
                "start_date": stay.check_in,
                "end_date": stay.check_out,
            },
            "party": {
                "travelers": get_path(document, "party.travelers").cloned().unwrap_or_else(|| json!({})),
                "rooms": get_path(document, "itinerary.lodging.rooms").cloned().unwrap_or(json!(1)),
            },
            "constraints": {
                "hotel_star_min": prefs.get("star_min").cloned().unwrap_or(json!(3)),
                "refundable_only": prefs.get("refundable_only").cloned().unwrap_or(json!(false)),
                "location_hint": stay.location_hint
                    .map(Value::from)
                    .or_else(|| get_path(document, "itinerary.lodging.location_hint").cloned())
                    .unwrap_or(Value::Null),
            },
            "result_limit": 10,
        }),
    })
}

fn flatten_rooms(per_stay: &Value) -> Vec<Value> {
    per_stay
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .flat_map(|room| room.as_array().cloned().unwrap_or_default())
        .collect()
}

/// One occupancy entry per room; travelers split evenly, capped at four per
/// room so provider limits hold.
fn room_occupancies(document: &Value, rooms: usize) -> Vec<Value> {
    let adults = get_path(document, "party.travelers.adults")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let children = get_path(document, "party.travelers.children")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let rooms = rooms.max(1);
    (0..rooms)
        .map(|room| {
            let adults_here = (adults / rooms + usize::from(room < adults % rooms)).min(4);
            let children_here = children / rooms + usize::from(room < children % rooms);
            json!({
                "adults": adults_here,
                "children": children_here.min(4usize.saturating_sub(adults_here)),
            })
        })
        .collect()
}

fn ranker_call(document: &Value, segment_count: usize, stay_count: usize) -> ToolCall {
    let rooms = get_path(document, "itinerary.lodging.rooms")
        .and_then(Value::as_u64)
        .unwrap_or(1) as usize;
    let mut arguments = json!({
        "trip_intent": intent_summary(document),
        "ranking_policy": {
            "weights": {"price": 0.5, "duration": 0.2, "refundable": 0.2, "convenience": 0.1},
        },
    });
    let multi = segment_count > 1 || stay_count > 1;
    if multi {
        let by_segment = get_array(document, "working_memory.flight_quotes_by_segment");
        let by_stay = get_array(document, "working_memory.hotel_quotes_by_stay");
        let hotel_options_by_stay: Vec<Value> = by_stay
            .iter()
            .map(|per_stay| json!(flatten_rooms(per_stay)))
            .collect();
        arguments["flight_options_by_segment"] = json!(by_segment);
        arguments["hotel_options_by_stay"] = json!(hotel_options_by_stay);
        arguments["room_counts_per_stay"] = json!(vec![rooms; stay_count]);
        arguments["room_occupancies"] = json!(room_occupancies(document, rooms));
    } else {
        let flights = get_array(document, "working_memory.flight_quotes").to_vec();
        let flights = if flights.is_empty() {
            get_array(document, "working_memory.flight_quotes_by_segment")
                .first()
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        } else {
            flights
        };
        let hotels = get_array(document, "working_memory.hotel_quotes").to_vec();
        let hotels = if hotels.is_empty() {
            get_array(document, "working_memory.hotel_quotes_by_stay")
                .first()
                .map(flatten_rooms)
                .unwrap_or_default()
        } else {
            hotels
        };
        arguments["flight_options"] = json!(flights);
        arguments["hotel_options"] = json!(hotels);
    }
    ToolCall {
        tool: ToolId::TripOptionRanker,
        arguments,
    }
}

fn render_bundles(document: &Value) -> String {
    let mut lines = vec!["Here are the top options:".to_string()];
    for bundle in get_array(document, "working_memory.ranked_bundles").iter().take(3) {
        let bundle_id = bundle
            .get("bundle_id")
            .and_then(Value::as_str)
            .unwrap_or("?");
        let total = get_path(bundle, "estimated_total.amount")
            .map(Value::to_string)
            .unwrap_or_else(|| "?".to_string());
        let currency = get_path(bundle, "estimated_total.currency")
            .and_then(Value::as_str)
            .unwrap_or("USD");
        let why = bundle.get("why").and_then(Value::as_str).unwrap_or("");
        lines.push(format!("- {bundle_id}: total {total} {currency} - {why}"));
        for tradeoff in bundle
            .get("tradeoffs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(Value::as_str)
            .take(2)
        {
            lines.push(format!("  - tradeoff: {tradeoff}"));
        }
    }
    lines.push("Reply with a bundle_id to risk-check it, or tell me what to change.".to_string());
    lines.join("\n")
}

fn render_risk_report(document: &Value) -> Option<String> {
    let report = get_path(document, "working_memory.risk_report")?;
    if report.is_null() {
        return None;
    }
    let blockers = blocking_issues(document);
    if !blockers.is_empty() {
        let mut lines = vec!["This bundle has blocking policy issues:".to_string()];
        for issue in blockers {
            lines.push(format!("- {issue}"));
        }
        lines.push("Pick a different bundle_id or adjust the trip.".to_string());
        return Some(lines.join("\n"));
    }
    let risks: Vec<&str> = report
        .get("risks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .filter_map(Value::as_str)
        .collect();
    let mut lines = Vec::new();
    if risks.is_empty() {
        lines.push("No policy issues found.".to_string());
    } else {
        lines.push("Risks to note:".to_string());
        for risk in risks {
            lines.push(format!("- {risk}"));
        }
    }
    lines.push("Say 'hold' to place holds, or pick a different bundle_id.".to_string());
    Some(lines.join("\n"))
}

/// Shared continuation after intent extraction or any tool result: recompute
/// completeness, then fill the lowest-index missing quote cache, then rank,
/// then present. At most one tool call comes out.
fn reduce_pipeline(document: &mut Value, announce_search: bool) -> Reduction {
    let state = crate::document::trip_state(document);
    let missing = missing_required_for_quotes(document);
    set_missing_required(document, &missing);
    touch(document);

    if !missing.is_empty() {
        set_status(document, Phase::Intake, TripState::CollectingRequirements);
        let mut reduction = Reduction::call(
            ToolId::GenerateFollowupQuestions,
            json!({
                "missing": missing.iter().take(3).collect::<Vec<_>>(),
                "user_message": get_str(document, "request.user_message").unwrap_or(""),
            }),
        );
        if state == Some(TripState::RiskChecking) {
            if let Some(text) = render_risk_report(document) {
                reduction.messages.push(text);
            }
        }
        return reduction;
    }

    let mut reduction = Reduction::default();
    if announce_search {
        reduction
            .messages
            .push("Searching for flights and hotels...".to_string());
    }

    for index in flight_segment_indices(document) {
        if cached_flight_quotes(document, index) {
            continue;
        }
        if let Some(call) = flight_search_call(document, index) {
            set_status(document, Phase::Quote, TripState::QuotingFlights);
            reduction.tool_calls.push(call);
            return reduction;
        }
    }

    let stay_count = if lodging_needed(document) {
        effective_stays(document).len()
    } else {
        0
    };
    for index in 0..stay_count {
        if cached_hotel_quotes(document, index, stay_count) {
            continue;
        }
        if let Some(call) = hotel_search_call(document, index) {
            set_status(document, Phase::Quote, TripState::QuotingHotels);
            reduction.tool_calls.push(call);
            return reduction;
        }
    }

    let bundles = get_array(document, "working_memory.ranked_bundles");
    if bundles.is_empty() {
        let segment_count = flight_segment_indices(document).len();
        set_status(document, Phase::Quote, TripState::RankingBundles);
        reduction
            .tool_calls
            .push(ranker_call(document, segment_count, stay_count));
        return reduction;
    }

    match state {
        Some(TripState::RankingBundles) | Some(TripState::PresentingOptions) => {
            set_status(document, Phase::Quote, TripState::PresentingOptions);
            reduction.messages.push(render_bundles(document));
        }
        Some(TripState::RiskChecking) => {
            if let Some(text) = render_risk_report(document) {
                reduction.messages.push(text);
            }
        }
        Some(TripState::AwaitingPurchaseApproval) => {
            let holds = get_array(document, "working_memory.holds");
            if !holds.is_empty() {
                let mut lines = vec!["Holds placed:".to_string()];
                for hold in holds {
                    let hold_id = hold.get("hold_id").and_then(Value::as_str).unwrap_or("?");
                    let status = hold.get("status").and_then(Value::as_str).unwrap_or("?");
                    lines.push(format!("- {hold_id} ({status})"));
                }
                lines.push(
                    "Reply 'approve purchase approval_token=<token> payment_method_id=<id>' to book."
                        .to_string(),
                );
                reduction.messages.push(lines.join("\n"));
            }
        }
        Some(TripState::Completed) => {
            if let Some(booking) = get_array(document, "working_memory.bookings").last() {
                let locator = booking.get("locator").and_then(Value::as_str).unwrap_or("?");
                reduction
                    .messages
                    .push(format!("Booking confirmed. Locator: {locator}."));
            }
        }
        _ => {}
    }
    reduction
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::applier::apply_tool_result;
    use crate::document::new_trip_intent;
    use crate::document::trip_state;
    use crate::document::POLICY_BLOCK_MARKER;

    use super::*;

    fn ready_document() -> Value {
        let mut document = new_trip_intent("trip_42", "EWR to DEN June 1-4, 2 adults");
        let extraction = json!({
            "trip_intent": {
                "origin": "EWR",
                "destination": "DEN",
                "trip_type": "round_trip",
                "dates": {"departure_date": "2026-06-01", "return_date": "2026-06-04"},
                "travelers": {"adults": 2},
            },
            "missing_required_fields": [],
        });
        apply_tool_result(
            &mut document,
            ToolId::TripRequirementsExtract,
            &json!({}),
            &extraction,
        );
        document
    }

    fn quoted_document() -> Value {
        let mut document = ready_document();
        for segment_index in 0..2 {
            apply_tool_result(
                &mut document,
                ToolId::FlightQuoteSearch,
                &json!({"segment_index": segment_index}),
                &json!({"options": [{"option_id": format!("flt_{segment_index}"), "total_price": 300.0}]}),
            );
        }
        apply_tool_result(
            &mut document,
            ToolId::HotelQuoteSearch,
            &json!({"stay_index": 0}),
            &json!({"options": [{"option_id": "htl_0", "nightly_rate": 180.0}]}),
        );
        document
    }

    fn ranked_document() -> Value {
        let mut document = quoted_document();
        // Drives the state to ranking_bundles the way a live turn would.
        reduce(
            &mut document,
            &TripEvent::ToolResult {
                tool_name: "hotel_quote_search".to_string(),
                result: json!({}),
            },
        );
        apply_tool_result(
            &mut document,
            ToolId::TripOptionRanker,
            &json!({}),
            &json!({"bundles": [{
                "bundle_id": "bndl_1",
                "flight_option_ids": ["flt_0", "flt_1"],
                "hotel_option_ids": ["htl_0"],
                "estimated_total": {"amount": 780.0, "currency": "USD"},
                "why": "cheapest nonstop pairing",
                "tradeoffs": ["early departure"],
            }]}),
        );
        document
    }

    #[test]
    fn user_message_only_requests_extraction() {
        let mut document = new_trip_intent("trip_42", "");
        let reduction = reduce(
            &mut document,
            &TripEvent::UserMessage {
                text: "EWR to DEN".to_string(),
            },
        );
        assert_eq!(reduction.tool_calls.len(), 1);
        assert_eq!(
            reduction.tool_calls[0].tool,
            ToolId::TripRequirementsExtract
        );
        assert_eq!(
            reduction.tool_calls[0].arguments["user_message"],
            json!("EWR to DEN")
        );
        assert_eq!(trip_state(&document), Some(TripState::CollectingRequirements));
    }

    #[test]
    fn incomplete_intent_asks_followup_questions() {
        let mut document = new_trip_intent("trip_42", "somewhere warm");
        let reduction = reduce(&mut document, &TripEvent::IntentReady);
        assert_eq!(reduction.tool_calls.len(), 1);
        assert_eq!(
            reduction.tool_calls[0].tool,
            ToolId::GenerateFollowupQuestions
        );
        let missing = reduction.tool_calls[0].arguments["missing"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert!(missing.len() <= 3);
        assert_eq!(trip_state(&document), Some(TripState::CollectingRequirements));
    }

    #[test]
    fn quote_scan_fills_lowest_missing_segment_first() {
        let mut document = ready_document();
        let reduction = reduce(&mut document, &TripEvent::IntentReady);
        assert_eq!(reduction.messages, vec!["Searching for flights and hotels...".to_string()]);
        assert_eq!(reduction.tool_calls.len(), 1);
        assert_eq!(reduction.tool_calls[0].tool, ToolId::FlightQuoteSearch);
        assert_eq!(reduction.tool_calls[0].arguments["segment_index"], json!(0));
        assert_eq!(reduction.tool_calls[0].arguments["origin"], json!("EWR"));
        assert_eq!(trip_state(&document), Some(TripState::QuotingFlights));

        apply_tool_result(
            &mut document,
            ToolId::FlightQuoteSearch,
            &json!({"segment_index": 0}),
            &json!({"options": [{"option_id": "flt_0"}]}),
        );
        let reduction = reduce(
            &mut document,
            &TripEvent::ToolResult {
                tool_name: "flight_quote_search".to_string(),
                result: json!({}),
            },
        );
        assert_eq!(reduction.tool_calls[0].tool, ToolId::FlightQuoteSearch);
        assert_eq!(reduction.tool_calls[0].arguments["segment_index"], json!(1));
        assert_eq!(reduction.tool_calls[0].arguments["origin"], json!("DEN"));
    }

    #[test]
    fn hotels_then_ranker_follow_flight_quotes() {
        let mut document = ready_document();
        for segment_index in 0..2 {
            apply_tool_result(
                &mut document,
                ToolId::FlightQuoteSearch,
                &json!({"segment_index": segment_index}),
                &json!({"options": [{"option_id": format!("flt_{segment_index}")}]}),
            );
        }
        let reduction = reduce(
            &mut document,
            &TripEvent::ToolResult {
                tool_name: "flight_quote_search".to_string(),
                result: json!({}),
            },
        );
        assert_eq!(reduction.tool_calls[0].tool, ToolId::HotelQuoteSearch);
        assert_eq!(reduction.tool_calls[0].arguments["destination"], json!("DEN"));
        assert_eq!(trip_state(&document), Some(TripState::QuotingHotels));

        apply_tool_result(
            &mut document,
            ToolId::HotelQuoteSearch,
            &json!({"stay_index": 0}),
            &json!({"options": [{"option_id": "htl_0"}]}),
        );
        let reduction = reduce(
            &mut document,
            &TripEvent::ToolResult {
                tool_name: "hotel_quote_search".to_string(),
                result: json!({}),
            },
        );
        assert_eq!(reduction.tool_calls[0].tool, ToolId::TripOptionRanker);
        assert_eq!(trip_state(&document), Some(TripState::RankingBundles));
        assert!(reduction.tool_calls[0]
            .arguments
            .get("flight_options_by_segment")
            .is_some());
    }

    #[test]
    fn ranked_bundles_are_presented_once() {
        let mut document = ranked_document();
        let reduction = reduce(
            &mut document,
            &TripEvent::ToolResult {
                tool_name: "trip_option_ranker".to_string(),
                result: json!({}),
            },
        );
        assert_eq!(reduction.tool_calls.len(), 0);
        assert_eq!(trip_state(&document), Some(TripState::PresentingOptions));
        let text = reduction.messages.join("\n");
        assert!(text.contains("bndl_1"));
        assert!(text.contains("tradeoff: early departure"));
    }

    #[test]
    fn selecting_a_known_bundle_requests_risk_check() {
        let mut document = ranked_document();
        let reduction = reduce(
            &mut document,
            &TripEvent::UserSelectedBundle {
                bundle_id: "bndl_1".to_string(),
            },
        );
        assert_eq!(reduction.tool_calls.len(), 1);
        assert_eq!(reduction.tool_calls[0].tool, ToolId::PolicyAndRiskCheck);
        assert_eq!(trip_state(&document), Some(TripState::RiskChecking));
        let selected_flights = reduction.tool_calls[0].arguments["selected_flights"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(selected_flights.len(), 2);
        assert_eq!(
            document["working_memory"]["selected"]["bundle_id"],
            json!("bndl_1")
        );
    }

    #[test]
    fn unknown_bundle_selection_changes_nothing() {
        let mut document = ranked_document();
        let before_state = trip_state(&document);
        let reduction = reduce(
            &mut document,
            &TripEvent::UserSelectedBundle {
                bundle_id: "bndl_99".to_string(),
            },
        );
        assert_eq!(reduction.tool_calls.len(), 0);
        assert_eq!(
            reduction.messages,
            vec!["Unknown bundle id bndl_99. Reply with one of the listed bundle ids.".to_string()]
        );
        assert_eq!(trip_state(&document), before_state);
        assert_eq!(
            document["working_memory"]["selected"]["bundle_id"],
            Value::Null
        );
    }

    #[test]
    fn blocking_risk_report_blocks_holds() {
        let mut document = ranked_document();
        reduce(
            &mut document,
            &TripEvent::UserSelectedBundle {
                bundle_id: "bndl_1".to_string(),
            },
        );
        apply_tool_result(
            &mut document,
            ToolId::PolicyAndRiskCheck,
            &json!({}),
            &json!({"risks": [], "blocking_issues": ["fare exceeds budget_total"]}),
        );
        let reduction = reduce(
            &mut document,
            &TripEvent::ToolResult {
                tool_name: "policy_and_risk_check".to_string(),
                result: json!({}),
            },
        );
        let missing = get_array(&document, "status.missing_required");
        assert!(missing.contains(&json!(POLICY_BLOCK_MARKER)));
        assert!(reduction
            .messages
            .iter()
            .any(|message| message.contains("blocking policy issues")));

        let reduction = reduce(&mut document, &TripEvent::UserRequestHold);
        assert_eq!(reduction.tool_calls.len(), 0);
        assert_eq!(
            reduction.messages,
            vec![
                "I can't place holds because the selected bundle has blocking policy issues."
                    .to_string()
            ]
        );
    }

    #[test]
    fn hold_request_builds_one_item_per_selected_option() {
        let mut document = ranked_document();
        reduce(
            &mut document,
            &TripEvent::UserSelectedBundle {
                bundle_id: "bndl_1".to_string(),
            },
        );
        apply_tool_result(
            &mut document,
            ToolId::PolicyAndRiskCheck,
            &json!({}),
            &json!({"risks": [], "blocking_issues": []}),
        );
        let reduction = reduce(&mut document, &TripEvent::UserRequestHold);
        assert_eq!(reduction.tool_calls.len(), 1);
        assert_eq!(reduction.tool_calls[0].tool, ToolId::ReservationHoldCreate);
        assert_eq!(
            reduction.tool_calls[0].arguments["idempotency_key"],
            json!("hold_trip_42_bndl_1")
        );
        let items = reduction.tool_calls[0].arguments["items"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(items.len(), 3);
        assert_eq!(trip_state(&document), Some(TripState::CreatingHolds));
    }

    #[test]
    fn purchase_approval_requires_an_active_hold() {
        let mut document = ranked_document();
        let reduction = reduce(
            &mut document,
            &TripEvent::UserApprovedPurchase {
                approval_token: "tok_1".to_string(),
                payment_method_id: "pm_1".to_string(),
            },
        );
        assert_eq!(reduction.tool_calls.len(), 0);
        assert_eq!(
            reduction.messages,
            vec!["No active holds found. Say 'hold' first, then approve purchase.".to_string()]
        );

        apply_tool_result(
            &mut document,
            ToolId::ReservationHoldCreate,
            &json!({}),
            &json!({"holds": [{"hold_id": "hold_1", "status": "held"}]}),
        );
        let reduction = reduce(
            &mut document,
            &TripEvent::UserApprovedPurchase {
                approval_token: "tok_1".to_string(),
                payment_method_id: "pm_1".to_string(),
            },
        );
        assert_eq!(reduction.tool_calls.len(), 1);
        assert_eq!(
            reduction.tool_calls[0].tool,
            ToolId::BookingConfirmAndPurchase
        );
        assert_eq!(
            reduction.tool_calls[0].arguments["hold_ids"],
            json!(["hold_1"])
        );
    }

    #[test]
    fn tool_error_parks_the_trip_as_retryable() {
        let mut document = ready_document();
        let reduction = reduce(
            &mut document,
            &TripEvent::ToolError {
                tool_name: "flight_quote_search".to_string(),
                error: "upstream timeout".to_string(),
            },
        );
        assert_eq!(reduction.tool_calls.len(), 0);
        assert_eq!(trip_state(&document), Some(TripState::Retryable));
        assert_eq!(
            get_str(&document, "status.last_tool_error.tool_name"),
            Some("flight_quote_search")
        );
        let notes = get_array(&document, "status.notes");
        let expected = "[tool_error] flight_quote_search failed: upstream timeout. \
                        Say 'try again' or send a new message to re-run.";
        assert!(notes.iter().filter_map(Value::as_str).any(|note| note == expected));

        // A fresh message clears the error and restarts intake.
        let reduction = reduce(
            &mut document,
            &TripEvent::UserMessage {
                text: "try again".to_string(),
            },
        );
        assert_eq!(
            reduction.tool_calls[0].tool,
            ToolId::TripRequirementsExtract
        );
        assert_eq!(get_path(&document, "status.last_tool_error"), None);
    }

    #[test]
    fn event_serialization_uses_screaming_snake_tags() {
        let event = TripEvent::UserSelectedBundle {
            bundle_id: "bndl_1".to_string(),
        };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "USER_SELECTED_BUNDLE", "data": {"bundle_id": "bndl_1"}})
        );
        let decoded: TripEvent = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, event);
    }
}
