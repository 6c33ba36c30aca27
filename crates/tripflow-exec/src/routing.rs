use regex::Regex;

use tripflow_core::reducer::TripEvent;

/// Maps raw user text onto reducer events. Anything that does not match a
/// structured command falls through to a plain message, which re-runs intent
/// extraction.
#[derive(Debug)]
pub struct MessageRouter {
    bundle_id: Regex,
    hold_request: Regex,
    approval: Regex,
    approval_token: Regex,
    payment_method: Regex,
}

impl MessageRouter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bundle_id: Regex::new(r"\b(bndl_[A-Za-z0-9_]+)\b")?,
            hold_request: Regex::new(r"(?i)\b(hold|holds)\b")?,
            approval: Regex::new(r"(?i)\b(approve|confirm)\b.*\b(purchase|booking|buy)\b")?,
            approval_token: Regex::new(r"approval_token\s*=\s*(\S+)")?,
            payment_method: Regex::new(r"payment_method_id\s*=\s*(\S+)")?,
        })
    }

    pub fn route(&self, text: &str) -> TripEvent {
        if self.approval.is_match(text) {
            let token = self
                .approval_token
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|capture| capture.as_str().to_string());
            let payment = self
                .payment_method
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|capture| capture.as_str().to_string());
            // Approval without both credentials is treated as conversation.
            if let (Some(approval_token), Some(payment_method_id)) = (token, payment) {
                return TripEvent::UserApprovedPurchase {
                    approval_token,
                    payment_method_id,
                };
            }
        }
        if let Some(captures) = self.bundle_id.captures(text) {
            if let Some(bundle_id) = captures.get(1) {
                return TripEvent::UserSelectedBundle {
                    bundle_id: bundle_id.as_str().to_string(),
                };
            }
        }
        if self.hold_request.is_match(text) {
            return TripEvent::UserRequestHold;
        }
        TripEvent::UserMessage {
            text: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn router() -> MessageRouter {
        MessageRouter::new().expect("router patterns")
    }

    #[test]
    fn bundle_ids_route_to_selection() {
        assert_eq!(
            router().route("let's go with bndl_2 please"),
            TripEvent::UserSelectedBundle {
                bundle_id: "bndl_2".to_string(),
            }
        );
    }

    #[test]
    fn hold_words_route_to_hold_request() {
        assert_eq!(router().route("place a HOLD on that"), TripEvent::UserRequestHold);
    }

    #[test]
    fn approval_needs_token_and_payment_method() {
        assert_eq!(
            router().route("approve purchase approval_token=tok_1 payment_method_id=pm_1"),
            TripEvent::UserApprovedPurchase {
                approval_token: "tok_1".to_string(),
                payment_method_id: "pm_1".to_string(),
            }
        );
        assert_eq!(
            router().route("approve the purchase"),
            TripEvent::UserMessage {
                text: "approve the purchase".to_string(),
            }
        );
    }

    #[test]
    fn plain_text_falls_through_to_user_message() {
        assert_eq!(
            router().route("fly me to Denver in June"),
            TripEvent::UserMessage {
                text: "fly me to Denver in June".to_string(),
            }
        );
    }
}
