use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

pub const TRIP_INTENT_SCHEMA: &str = "tripflow.trip_intent.v1";

/// Synthetic missing-requirement path injected while the current risk report
/// carries blocking issues. Holds and purchases are withheld until it clears.
pub const POLICY_BLOCK_MARKER: &str = "working_memory.risk_report.blocking_issues";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intake,
    Quote,
    Hold,
    Book,
    Completed,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Quote => "quote",
            Self::Hold => "hold",
            Self::Book => "book",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "intake" => Some(Self::Intake),
            "quote" => Some(Self::Quote),
            "hold" => Some(Self::Hold),
            "book" => Some(Self::Book),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripState {
    CollectingRequirements,
    ReadyToQuote,
    QuotingFlights,
    QuotingHotels,
    RankingBundles,
    PresentingOptions,
    RiskChecking,
    CreatingHolds,
    AwaitingPurchaseApproval,
    Completed,
    Retryable,
}

impl TripState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectingRequirements => "collecting_requirements",
            Self::ReadyToQuote => "ready_to_quote",
            Self::QuotingFlights => "quoting_flights",
            Self::QuotingHotels => "quoting_hotels",
            Self::RankingBundles => "ranking_bundles",
            Self::PresentingOptions => "presenting_options",
            Self::RiskChecking => "risk_checking",
            Self::CreatingHolds => "creating_holds",
            Self::AwaitingPurchaseApproval => "awaiting_purchase_approval",
            Self::Completed => "completed",
            Self::Retryable => "retryable",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "collecting_requirements" => Some(Self::CollectingRequirements),
            "ready_to_quote" => Some(Self::ReadyToQuote),
            "quoting_flights" => Some(Self::QuotingFlights),
            "quoting_hotels" => Some(Self::QuotingHotels),
            "ranking_bundles" => Some(Self::RankingBundles),
            "presenting_options" => Some(Self::PresentingOptions),
            "risk_checking" => Some(Self::RiskChecking),
            "creating_holds" => Some(Self::CreatingHolds),
            "awaiting_purchase_approval" => Some(Self::AwaitingPurchaseApproval),
            "completed" => Some(Self::Completed),
            "retryable" => Some(Self::Retryable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSource {
    UserMessage,
    SystemPolicy,
    AgentAssumption,
    OperatorOverride,
    ToolResult,
}

impl PatchSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::SystemPolicy => "system_policy",
            Self::AgentAssumption => "agent_assumption",
            Self::OperatorOverride => "operator_override",
            Self::ToolResult => "tool_result",
        }
    }
}

pub fn empty_selection() -> Value {
    json!({
        "bundle_id": null,
        "flight_option_id": null,
        "hotel_option_id": null,
        "flight_option_ids": [],
        "hotel_option_ids": [],
    })
}

/// Every working-memory key an invalidation rule may touch. Absence is not a
/// valid "empty" state, so this constructor is the single source of shape.
pub fn new_working_memory() -> Value {
    json!({
        "flight_quotes": [],
        "hotel_quotes": [],
        "flight_quotes_by_segment": [],
        "hotel_quotes_by_stay": [],
        "ranked_bundles": [],
        "risk_report": null,
        "selected": empty_selection(),
        "holds": [],
        "bookings": [],
    })
}

pub fn new_trip_intent(trip_id: &str, user_message: &str) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "schema": TRIP_INTENT_SCHEMA,
        "trip_id": trip_id,
        "created_at": now,
        "updated_at": now,
        "request": {
            "user_message": user_message,
            "locale": "en-US",
            "timezone": "America/New_York",
        },
        "status": {
            "phase": Phase::Intake.as_str(),
            "state": TripState::CollectingRequirements.as_str(),
            "missing_required": [],
            "assumptions": [],
            "notes": [],
        },
        "party": {
            "travelers": {"adults": 0, "children": 0, "infants": 0},
            "traveler_profile_ids": [],
            "contact": {"email": null, "phone": null},
        },
        "itinerary": {
            "trip_type": null,
            "segments": [],
            "lodging": {
                "needed": true,
                "check_in": null,
                "check_out": null,
                "rooms": 1,
                "guests_per_room": 2,
                "location_hint": null,
                "stays": [],
            },
            "ground": {"needed": false},
        },
        "preferences": {"flight": {}, "hotel": {}},
        "constraints": {
            "budget_total": null,
            "currency": "USD",
            "refundable_preference": "either",
        },
        "policy": {
            "rules": {
                "require_user_approval_to_purchase": true,
                "holds_allowed_without_approval": true,
            },
        },
        "working_memory": new_working_memory(),
        "audit": {"events": []},
    })
}

/// Re-establishes every working-memory key, merge-if-absent. Runs at the start
/// of every patch so invalidation never sees a missing slot.
pub fn ensure_working_memory_defaults(document: &mut Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };
    let wm_value = root
        .entry("working_memory".to_string())
        .or_insert_with(new_working_memory);
    if !wm_value.is_object() {
        *wm_value = new_working_memory();
    }
    let defaults = new_working_memory();
    let Some(wm) = wm_value.as_object_mut() else {
        return;
    };
    if let Some(default_map) = defaults.as_object() {
        for (key, default) in default_map {
            wm.entry(key.clone()).or_insert_with(|| default.clone());
        }
    }
    let selected = wm
        .entry("selected".to_string())
        .or_insert_with(empty_selection);
    if let Some(sel) = selected.as_object_mut() {
        sel.entry("flight_option_ids".to_string())
            .or_insert_with(|| json!([]));
        sel.entry("hotel_option_ids".to_string())
            .or_insert_with(|| json!([]));
    } else {
        *selected = empty_selection();
    }
}

pub fn get_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

pub fn get_str<'a>(document: &'a Value, path: &str) -> Option<&'a str> {
    get_path(document, path).and_then(Value::as_str)
}

pub fn get_array<'a>(document: &'a Value, path: &str) -> &'a [Value] {
    get_path(document, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn phase(document: &Value) -> Option<Phase> {
    get_str(document, "status.phase").and_then(Phase::parse)
}

pub fn trip_state(document: &Value) -> Option<TripState> {
    get_str(document, "status.state").and_then(TripState::parse)
}

pub fn set_status(document: &mut Value, phase: Phase, state: TripState) {
    if let Some(status) = document
        .get_mut("status")
        .and_then(Value::as_object_mut)
    {
        status.insert("phase".to_string(), json!(phase.as_str()));
        status.insert("state".to_string(), json!(state.as_str()));
    }
}

pub fn push_note(document: &mut Value, note: &str) {
    let Some(status) = document.get_mut("status").and_then(Value::as_object_mut) else {
        return;
    };
    let notes = status
        .entry("notes".to_string())
        .or_insert_with(|| json!([]));
    if let Some(notes) = notes.as_array_mut() {
        notes.push(json!(note));
    }
}

pub fn touch(document: &mut Value) {
    if let Some(root) = document.as_object_mut() {
        root.insert(
            "updated_at".to_string(),
            json!(chrono::Utc::now().timestamp()),
        );
    }
}

pub fn record_audit_event(document: &mut Value, event_type: &str, data: Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };
    let audit = root
        .entry("audit".to_string())
        .or_insert_with(|| json!({"events": []}));
    let events = audit
        .as_object_mut()
        .map(|audit| {
            audit
                .entry("events".to_string())
                .or_insert_with(|| json!([]))
        })
        .and_then(Value::as_array_mut);
    if let Some(events) = events {
        events.push(json!({
            "ts": chrono::Utc::now().timestamp(),
            "type": event_type,
            "data": data,
        }));
    }
}

pub fn segments(document: &Value) -> &[Value] {
    get_array(document, "itinerary.segments")
}

/// Indices of segments quoted as flights. Non-flight modes keep their index so
/// cache addressing stays aligned with segment order.
pub fn flight_segment_indices(document: &Value) -> Vec<usize> {
    segments(document)
        .iter()
        .enumerate()
        .filter(|(_, segment)| {
            segment
                .get("transport_mode")
                .and_then(Value::as_str)
                .unwrap_or("flight")
                == "flight"
        })
        .map(|(index, _)| index)
        .collect()
}

pub fn lodging_needed(document: &Value) -> bool {
    get_path(document, "itinerary.lodging.needed")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

pub fn has_explicit_stays(document: &Value) -> bool {
    !get_array(document, "itinerary.lodging.stays").is_empty()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StayWindow {
    pub location_code: Option<String>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub location_hint: Option<String>,
}

impl StayWindow {
    fn from_value(stay: &Value) -> Self {
        let field = |key: &str| {
            stay.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            location_code: field("location_code").or_else(|| field("destination")),
            check_in: field("check_in"),
            check_out: field("check_out"),
            location_hint: field("location_hint"),
        }
    }
}

/// Explicit stays when present; otherwise a single stay synthesized from the
/// lodging window and the first segment's destination.
pub fn effective_stays(document: &Value) -> Vec<StayWindow> {
    let explicit = get_array(document, "itinerary.lodging.stays");
    if !explicit.is_empty() {
        return explicit.iter().map(StayWindow::from_value).collect();
    }
    if !lodging_needed(document) {
        return Vec::new();
    }
    let destination = segments(document)
        .first()
        .and_then(|segment| segment.get("destination"))
        .and_then(|destination| destination.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string);
    vec![StayWindow {
        location_code: destination,
        check_in: get_str(document, "itinerary.lodging.check_in").map(str::to_string),
        check_out: get_str(document, "itinerary.lodging.check_out").map(str::to_string),
        location_hint: get_str(document, "itinerary.lodging.location_hint").map(str::to_string),
    }]
}

pub fn blocking_issues(document: &Value) -> Vec<String> {
    get_array(document, "working_memory.risk_report.blocking_issues")
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

/// Authoritative completeness check. Recomputed from the current document on
/// every tool-result cycle; a tool's self-reported list is never trusted once
/// this has run.
pub fn missing_required_for_quotes(document: &Value) -> Vec<String> {
    let mut missing = Vec::new();
    let segs = segments(document);

    if segs.is_empty() {
        missing.push("itinerary.segments".to_string());
    } else {
        for (index, segment) in segs.iter().enumerate() {
            let code = |side: &str| {
                segment
                    .get(side)
                    .and_then(|endpoint| endpoint.get("code"))
                    .and_then(Value::as_str)
                    .filter(|code| !code.is_empty())
                    .is_some()
            };
            if !code("origin") {
                missing.push(format!("itinerary.segments[{index}].origin.code"));
            }
            if !code("destination") {
                missing.push(format!("itinerary.segments[{index}].destination.code"));
            }
            if segment
                .get("depart_date")
                .and_then(Value::as_str)
                .filter(|date| !date.is_empty())
                .is_none()
            {
                missing.push(format!("itinerary.segments[{index}].depart_date"));
            }
        }
    }

    let adults = get_path(document, "party.travelers.adults")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if adults < 1 {
        missing.push("party.travelers.adults".to_string());
    }

    if lodging_needed(document) {
        let stays = effective_stays(document);
        if stays.is_empty() {
            missing.push("itinerary.lodging.check_in".to_string());
            missing.push("itinerary.lodging.check_out".to_string());
        } else if has_explicit_stays(document) {
            for (index, stay) in stays.iter().enumerate() {
                if stay.location_code.is_none() {
                    missing.push(format!("itinerary.lodging.stays[{index}].location_code"));
                }
                if stay.check_in.is_none() {
                    missing.push(format!("itinerary.lodging.stays[{index}].check_in"));
                }
                if stay.check_out.is_none() {
                    missing.push(format!("itinerary.lodging.stays[{index}].check_out"));
                }
            }
        } else {
            let window = &stays[0];
            if window.check_in.is_none() {
                missing.push("itinerary.lodging.check_in".to_string());
            }
            if window.check_out.is_none() {
                missing.push("itinerary.lodging.check_out".to_string());
            }
        }
    }

    if !blocking_issues(document).is_empty() {
        missing.push(POLICY_BLOCK_MARKER.to_string());
    }

    missing
}

/// Compact view of the intent passed to ranking and risk tools.
pub fn intent_summary(document: &Value) -> Value {
    let segs = segments(document);
    let segments_summary: Vec<Value> = segs
        .iter()
        .map(|segment| {
            json!({
                "origin": segment.get("origin").and_then(|o| o.get("code")).cloned().unwrap_or(Value::Null),
                "destination": segment.get("destination").and_then(|d| d.get("code")).cloned().unwrap_or(Value::Null),
                "depart_date": segment.get("depart_date").cloned().unwrap_or(Value::Null),
                "transport_mode": segment.get("transport_mode").cloned().unwrap_or_else(|| json!("flight")),
            })
        })
        .collect();
    let stays_summary: Vec<Value> = effective_stays(document)
        .iter()
        .map(|stay| {
            json!({
                "location_code": stay.location_code,
                "check_in": stay.check_in,
                "check_out": stay.check_out,
            })
        })
        .collect();
    json!({
        "origin": segs.first()
            .and_then(|segment| segment.get("origin"))
            .and_then(|origin| origin.get("code"))
            .cloned()
            .unwrap_or(Value::Null),
        "destination": segs.first()
            .and_then(|segment| segment.get("destination"))
            .and_then(|destination| destination.get("code"))
            .cloned()
            .unwrap_or(Value::Null),
        "trip_type": get_path(document, "itinerary.trip_type").cloned().unwrap_or(Value::Null),
        "segments": segments_summary,
        "stays": stays_summary,
        "dates": {
            "departure_date": segs.first().and_then(|s| s.get("depart_date")).cloned().unwrap_or(Value::Null),
            "return_date": segs.get(1).and_then(|s| s.get("depart_date")).cloned().unwrap_or(Value::Null),
        },
        "travelers": get_path(document, "party.travelers").cloned().unwrap_or_else(|| json!({})),
        "constraints": get_path(document, "constraints").cloned().unwrap_or_else(|| json!({})),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn skeleton_starts_in_intake() {
        let document = new_trip_intent("trip_1", "fly EWR to DEN");
        assert_eq!(phase(&document), Some(Phase::Intake));
        assert_eq!(trip_state(&document), Some(TripState::CollectingRequirements));
        assert_eq!(get_str(&document, "schema"), Some(TRIP_INTENT_SCHEMA));
        assert_eq!(get_str(&document, "request.user_message"), Some("fly EWR to DEN"));
    }

    #[test]
    fn working_memory_defaults_fill_missing_keys_only() {
        let mut document = json!({
            "working_memory": {
                "flight_quotes": [{"option_id": "flt_seg0_0"}],
                "selected": {"bundle_id": "bndl_1"},
            },
        });
        ensure_working_memory_defaults(&mut document);
        assert_eq!(
            get_array(&document, "working_memory.flight_quotes").len(),
            1
        );
        assert_eq!(
            get_str(&document, "working_memory.selected.bundle_id"),
            Some("bndl_1")
        );
        assert_eq!(
            get_array(&document, "working_memory.selected.flight_option_ids").len(),
            0
        );
        assert!(get_path(&document, "working_memory.risk_report").is_some());
        assert!(get_path(&document, "working_memory.bookings").is_some());
    }

    #[test]
    fn completeness_flags_empty_document() {
        let document = new_trip_intent("trip_1", "");
        let missing = missing_required_for_quotes(&document);
        assert!(missing.contains(&"itinerary.segments".to_string()));
        assert!(missing.contains(&"party.travelers.adults".to_string()));
    }

    #[test]
    fn completeness_is_empty_for_quotable_document() {
        let mut document = new_trip_intent("trip_1", "");
        document["party"]["travelers"]["adults"] = json!(2);
        document["itinerary"]["segments"] = json!([{
            "origin": {"type": "airport", "code": "EWR"},
            "destination": {"type": "airport", "code": "DEN"},
            "depart_date": "2026-06-01",
            "transport_mode": "flight",
        }]);
        document["itinerary"]["lodging"]["check_in"] = json!("2026-06-01");
        document["itinerary"]["lodging"]["check_out"] = json!("2026-06-04");
        assert_eq!(missing_required_for_quotes(&document), Vec::<String>::new());
    }

    #[test]
    fn completeness_reports_per_segment_paths() {
        let mut document = new_trip_intent("trip_1", "");
        document["party"]["travelers"]["adults"] = json!(1);
        document["itinerary"]["lodging"]["needed"] = json!(false);
        document["itinerary"]["segments"] = json!([
            {
                "origin": {"type": "airport", "code": "EWR"},
                "destination": {"type": "airport", "code": "DEN"},
                "depart_date": "2026-06-01",
            },
            {
                "origin": {"type": "airport", "code": "DEN"},
                "destination": {},
            },
        ]);
        let missing = missing_required_for_quotes(&document);
        assert_eq!(
            missing,
            vec![
                "itinerary.segments[1].destination.code".to_string(),
                "itinerary.segments[1].depart_date".to_string(),
            ]
        );
    }

    #[test]
    fn blocking_issues_surface_as_marker() {
        let mut document = new_trip_intent("trip_1", "");
        document["party"]["travelers"]["adults"] = json!(1);
        document["itinerary"]["lodging"]["needed"] = json!(false);
        document["itinerary"]["segments"] = json!([{
            "origin": {"code": "EWR"},
            "destination": {"code": "DEN"},
            "depart_date": "2026-06-01",
        }]);
        document["working_memory"]["risk_report"] = json!({
            "risks": [],
            "blocking_issues": ["require_refundable violated"],
        });
        let missing = missing_required_for_quotes(&document);
        assert_eq!(missing, vec![POLICY_BLOCK_MARKER.to_string()]);
    }

    #[test]
    fn effective_stays_synthesize_from_lodging_window() {
        let mut document = new_trip_intent("trip_1", "");
        document["itinerary"]["segments"] = json!([{
            "origin": {"code": "EWR"},
            "destination": {"code": "DEN"},
            "depart_date": "2026-06-01",
        }]);
        document["itinerary"]["lodging"]["check_in"] = json!("2026-06-01");
        document["itinerary"]["lodging"]["check_out"] = json!("2026-06-04");
        let stays = effective_stays(&document);
        assert_eq!(stays.len(), 1);
        assert_eq!(stays[0].location_code.as_deref(), Some("DEN"));
        assert_eq!(stays[0].check_in.as_deref(), Some("2026-06-01"));
        assert_eq!(stays[0].check_out.as_deref(), Some("2026-06-04"));
    }

    #[test]
    fn flight_indices_skip_non_flight_modes() {
        let mut document = new_trip_intent("trip_1", "");
        document["itinerary"]["segments"] = json!([
            {"transport_mode": "flight"},
            {"transport_mode": "rail"},
            {"transport_mode": "flight"},
        ]);
        assert_eq!(flight_segment_indices(&document), vec![0, 2]);
    }
}
