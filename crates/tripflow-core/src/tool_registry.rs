use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    TripRequirementsExtract,
    FlightQuoteSearch,
    HotelQuoteSearch,
    TripOptionRanker,
    PolicyAndRiskCheck,
    ReservationHoldCreate,
    BookingConfirmAndPurchase,
    GenerateFollowupQuestions,
}

impl ToolId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TripRequirementsExtract => "trip_requirements_extract",
            Self::FlightQuoteSearch => "flight_quote_search",
            Self::HotelQuoteSearch => "hotel_quote_search",
            Self::TripOptionRanker => "trip_option_ranker",
            Self::PolicyAndRiskCheck => "policy_and_risk_check",
            Self::ReservationHoldCreate => "reservation_hold_create",
            Self::BookingConfirmAndPurchase => "booking_confirm_and_purchase",
            Self::GenerateFollowupQuestions => "generate_followup_questions",
        }
    }

    /// Unknown names are rejected here rather than silently ignored; the
    /// caller treats `None` as a configuration error.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "trip_requirements_extract" => Some(Self::TripRequirementsExtract),
            "flight_quote_search" => Some(Self::FlightQuoteSearch),
            "hotel_quote_search" => Some(Self::HotelQuoteSearch),
            "trip_option_ranker" => Some(Self::TripOptionRanker),
            "policy_and_risk_check" => Some(Self::PolicyAndRiskCheck),
            "reservation_hold_create" => Some(Self::ReservationHoldCreate),
            "booking_confirm_and_purchase" => Some(Self::BookingConfirmAndPurchase),
            "generate_followup_questions" => Some(Self::GenerateFollowupQuestions),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Extraction,
    Search,
    Ranking,
    RiskCheck,
    Hold,
    Purchase,
    Clarification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    pub id: ToolId,
    pub title: &'static str,
    pub description: &'static str,
    pub kind: ToolKind,
    /// Working-memory slots the applier writes from this tool's result.
    pub writes: &'static [&'static str],
}

pub struct ToolRegistry;

const TOOL_SPECS: [ToolSpec; 8] = [
    ToolSpec {
        id: ToolId::TripRequirementsExtract,
        title: "Extract Trip Requirements",
        description: "Turn a free-form user message into structured trip fields.",
        kind: ToolKind::Extraction,
        writes: &[],
    },
    ToolSpec {
        id: ToolId::FlightQuoteSearch,
        title: "Flight Quote Search",
        description: "Search flight options for one itinerary segment.",
        kind: ToolKind::Search,
        writes: &["flight_quotes", "flight_quotes_by_segment"],
    },
    ToolSpec {
        id: ToolId::HotelQuoteSearch,
        title: "Hotel Quote Search",
        description: "Search hotel options for one lodging stay.",
        kind: ToolKind::Search,
        writes: &["hotel_quotes", "hotel_quotes_by_stay"],
    },
    ToolSpec {
        id: ToolId::TripOptionRanker,
        title: "Rank Trip Options",
        description: "Combine quotes into ranked flight+hotel bundles.",
        kind: ToolKind::Ranking,
        writes: &["ranked_bundles"],
    },
    ToolSpec {
        id: ToolId::PolicyAndRiskCheck,
        title: "Policy and Risk Check",
        description: "Evaluate a selected bundle against org policy.",
        kind: ToolKind::RiskCheck,
        writes: &["risk_report"],
    },
    ToolSpec {
        id: ToolId::ReservationHoldCreate,
        title: "Create Reservation Holds",
        description: "Place holds on the selected flight and hotel options.",
        kind: ToolKind::Hold,
        writes: &["holds"],
    },
    ToolSpec {
        id: ToolId::BookingConfirmAndPurchase,
        title: "Confirm and Purchase",
        description: "Convert active holds into confirmed bookings.",
        kind: ToolKind::Purchase,
        writes: &["bookings"],
    },
    ToolSpec {
        id: ToolId::GenerateFollowupQuestions,
        title: "Generate Followup Questions",
        description: "Ask the user for still-missing required fields.",
        kind: ToolKind::Clarification,
        writes: &[],
    },
];

impl ToolRegistry {
    pub fn list() -> &'static [ToolSpec] {
        &TOOL_SPECS
    }

    pub fn get(id: ToolId) -> &'static ToolSpec {
        match id {
            ToolId::TripRequirementsExtract => &TOOL_SPECS[0],
            ToolId::FlightQuoteSearch => &TOOL_SPECS[1],
            ToolId::HotelQuoteSearch => &TOOL_SPECS[2],
            ToolId::TripOptionRanker => &TOOL_SPECS[3],
            ToolId::PolicyAndRiskCheck => &TOOL_SPECS[4],
            ToolId::ReservationHoldCreate => &TOOL_SPECS[5],
            ToolId::BookingConfirmAndPurchase => &TOOL_SPECS[6],
            ToolId::GenerateFollowupQuestions => &TOOL_SPECS[7],
        }
    }

    pub fn kind(id: ToolId) -> ToolKind {
        Self::get(id).kind
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn registry_lookup_is_deterministic() {
        let first = ToolRegistry::get(ToolId::TripOptionRanker);
        let second = ToolRegistry::get(ToolId::TripOptionRanker);
        assert_eq!(first, second);
    }

    #[test]
    fn registry_order_is_stable() {
        let ids: Vec<&'static str> = ToolRegistry::list()
            .iter()
            .map(|spec| spec.id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "trip_requirements_extract",
                "flight_quote_search",
                "hotel_quote_search",
                "trip_option_ranker",
                "policy_and_risk_check",
                "reservation_hold_create",
                "booking_confirm_and_purchase",
                "generate_followup_questions",
            ]
        );
    }

    #[test]
    fn parse_round_trips_every_id() {
        for spec in ToolRegistry::list() {
            assert_eq!(ToolId::parse(spec.id.as_str()), Some(spec.id));
        }
    }

    #[test]
    fn unknown_tool_names_are_rejected() {
        assert_eq!(ToolId::parse("car_rental_search"), None);
        assert_eq!(ToolId::parse(""), None);
    }
}
