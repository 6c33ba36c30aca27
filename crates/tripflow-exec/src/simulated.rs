use serde_json::json;
use serde_json::Value;

use tripflow_core::tool_registry::ToolId;

use crate::contracts::ToolError;
use crate::contracts::ToolHandler;
use crate::contracts::ToolInvocation;

/// Canned but shape-faithful tool results for demos and tests. Quote and
/// ranking outputs are derived from the invocation arguments so option ids
/// line up across the pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedToolHandler;

impl SimulatedToolHandler {
    fn extraction(&self, arguments: &Value) -> Value {
        let user_message = arguments
            .get("user_message")
            .and_then(Value::as_str)
            .unwrap_or("");
        json!({
            "trip_intent": {
                "origin": "EWR",
                "destination": "DEN",
                "trip_type": "round_trip",
                "dates": {"departure_date": "2026-06-01", "return_date": "2026-06-04"},
                "travelers": {"adults": 2},
                "constraints": {"max_stops": 1},
            },
            "missing_required_fields": [],
            "clarifying_questions": [],
            "echo": user_message,
        })
    }

    fn flight_quotes(&self, arguments: &Value) -> Value {
        let origin = arguments.get("origin").and_then(Value::as_str).unwrap_or("???");
        let destination = arguments
            .get("destination")
            .and_then(Value::as_str)
            .unwrap_or("???");
        json!({
            "options": [
                {
                    "carrier": "UA",
                    "route": format!("{origin}-{destination}"),
                    "departure_time": "08:05",
                    "stops": 0,
                    "refundable": false,
                    "total_price": 412.0,
                    "currency": "USD",
                },
                {
                    "carrier": "B6",
                    "route": format!("{origin}-{destination}"),
                    "departure_time": "17:40",
                    "stops": 1,
                    "refundable": true,
                    "total_price": 354.0,
                    "currency": "USD",
                },
            ],
        })
    }

    fn hotel_quotes(&self, arguments: &Value) -> Value {
        let destination = arguments
            .get("destination")
            .and_then(Value::as_str)
            .unwrap_or("???");
        json!({
            "options": [
                {
                    "name": format!("Harborview {destination}"),
                    "stars": 4,
                    "refundable": true,
                    "nightly_rate": 189.0,
                    "currency": "USD",
                },
                {
                    "name": format!("Transit Inn {destination}"),
                    "stars": 3,
                    "refundable": false,
                    "nightly_rate": 121.0,
                    "currency": "USD",
                },
            ],
        })
    }

    fn first_option_ids(pool: &Value) -> Vec<String> {
        let option_id = |option: &Value| {
            option
                .get("option_id")
                .or_else(|| option.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match pool {
            Value::Array(options) => options.first().and_then(option_id).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn ranked_bundles(&self, arguments: &Value) -> Value {
        let mut flight_ids = Vec::new();
        if let Some(by_segment) = arguments
            .get("flight_options_by_segment")
            .and_then(Value::as_array)
        {
            for per_segment in by_segment {
                flight_ids.extend(Self::first_option_ids(per_segment));
            }
        } else if let Some(options) = arguments.get("flight_options") {
            flight_ids.extend(Self::first_option_ids(options));
        }
        let mut hotel_ids = Vec::new();
        if let Some(by_stay) = arguments
            .get("hotel_options_by_stay")
            .and_then(Value::as_array)
        {
            for per_stay in by_stay {
                hotel_ids.extend(Self::first_option_ids(per_stay));
            }
        } else if let Some(options) = arguments.get("hotel_options") {
            hotel_ids.extend(Self::first_option_ids(options));
        }
        json!({
            "bundles": [{
                "bundle_id": "bndl_1",
                "flight_option_id": flight_ids.first().cloned(),
                "hotel_option_id": hotel_ids.first().cloned(),
                "flight_option_ids": flight_ids,
                "hotel_option_ids": hotel_ids,
                "estimated_total": {"amount": 1132.0, "currency": "USD"},
                "why": "best balance of price and schedule",
                "tradeoffs": ["outbound departs before 9am"],
            }],
        })
    }

    fn holds(&self, arguments: &Value) -> Value {
        let items = arguments
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let holds: Vec<Value> = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                json!({
                    "hold_id": format!("hold_{}", index + 1),
                    "status": "held",
                    "item_type": item.get("item_type").cloned().unwrap_or(Value::Null),
                    "option_id": item.get("option_id").cloned().unwrap_or(Value::Null),
                    "expires_at": "2026-06-01T00:00:00Z",
                })
            })
            .collect();
        json!({"holds": holds})
    }

    fn followup_questions(&self, arguments: &Value) -> Value {
        let questions: Vec<String> = arguments
            .get("missing")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(Value::as_str)
            .map(|path| {
                if path.contains("origin") {
                    "Where are you flying from?".to_string()
                } else if path.contains("destination") || path.contains("location_code") {
                    "Where are you headed?".to_string()
                } else if path.contains("depart_date") || path.contains("check_in") {
                    "What dates are you traveling?".to_string()
                } else if path.contains("adults") {
                    "How many people are traveling?".to_string()
                } else {
                    format!("Could you tell me more about {path}?")
                }
            })
            .collect();
        json!({"questions": questions})
    }
}

impl ToolHandler for SimulatedToolHandler {
    fn call(&self, invocation: &ToolInvocation) -> Result<Value, ToolError> {
        let arguments = &invocation.arguments;
        let result = match invocation.tool {
            ToolId::TripRequirementsExtract => self.extraction(arguments),
            ToolId::FlightQuoteSearch => self.flight_quotes(arguments),
            ToolId::HotelQuoteSearch => self.hotel_quotes(arguments),
            ToolId::TripOptionRanker => self.ranked_bundles(arguments),
            ToolId::PolicyAndRiskCheck => json!({
                "risks": ["lowest fare is non-refundable"],
                "blocking_issues": [],
            }),
            ToolId::ReservationHoldCreate => self.holds(arguments),
            ToolId::BookingConfirmAndPurchase => json!({
                "confirmation": {
                    "status": "ticketed",
                    "locator": "TF8Q2K",
                    "hold_ids": arguments.get("hold_ids").cloned().unwrap_or(json!([])),
                },
            }),
            ToolId::GenerateFollowupQuestions => self.followup_questions(arguments),
        };
        Ok(result)
    }
}
