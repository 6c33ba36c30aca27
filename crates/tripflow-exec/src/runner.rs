use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::json;
use serde_json::Value;

use tripflow_core::applier::apply_tool_result;
use tripflow_core::document::new_trip_intent;
use tripflow_core::document::record_audit_event;
use tripflow_core::document::touch;
use tripflow_core::document::trip_state;
use tripflow_core::document::TripState;
use tripflow_core::persistence::TripStore;
use tripflow_core::reducer::reduce;
use tripflow_core::reducer::TripEvent;
use tripflow_core::tool_registry::ToolId;

use crate::config::RunnerConfig;
use crate::contracts::ToolHandler;
use crate::contracts::ToolInvocation;
use crate::routing::MessageRouter;

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub trip_id: String,
    pub document: Value,
    pub messages: Vec<String>,
    pub actions_executed: usize,
}

/// Drives one trip turn at a time: reduce, execute the single pending tool
/// call, apply its result, persist, and reduce again until the turn settles
/// or the action budget runs out.
pub struct Runner<S: TripStore, H: ToolHandler> {
    store: Mutex<S>,
    handler: H,
    config: RunnerConfig,
    router: MessageRouter,
    trip_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn poisoned(what: &str) -> io::Error {
    io::Error::other(format!("{what} lock poisoned"))
}

impl<S: TripStore, H: ToolHandler> Runner<S, H> {
    pub fn new(store: S, handler: H, config: RunnerConfig) -> io::Result<Self> {
        let router = MessageRouter::new()
            .map_err(|err| io::Error::other(format!("routing patterns: {err}")))?;
        Ok(Self {
            store: Mutex::new(store),
            handler,
            config,
            router,
            trip_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn handle_message(&self, trip_id: &str, text: &str) -> io::Result<TurnOutcome> {
        self.handle_event(trip_id, self.router.route(text))
    }

    pub fn handle_event(&self, trip_id: &str, event: TripEvent) -> io::Result<TurnOutcome> {
        // The map lock is released before the trip lock is taken; the trip
        // lock then serializes whole turns for this trip only.
        let trip_lock = {
            let mut locks = self.trip_locks.lock().map_err(|_| poisoned("trip map"))?;
            Arc::clone(
                locks
                    .entry(trip_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _turn_guard = trip_lock.lock().map_err(|_| poisoned("trip"))?;

        let mut document = match self.get(trip_id)? {
            Some(document) => document,
            None => {
                let first_message = match &event {
                    TripEvent::UserMessage { text } => text.as_str(),
                    _ => "",
                };
                new_trip_intent(trip_id, first_message)
            }
        };
        if let TripEvent::UserMessage { text } = &event {
            document["request"]["user_message"] = json!(text);
            touch(&mut document);
        }
        let event_log = serde_json::to_value(&event)
            .map_err(|err| io::Error::other(format!("encode event: {err}")))?;
        record_audit_event(&mut document, "event_received", event_log);

        let mut reduction = reduce(&mut document, &event);
        self.save(trip_id, &document)?;
        let mut messages = std::mem::take(&mut reduction.messages);
        let mut pending = reduction.tool_calls;
        let mut actions_executed = 0usize;

        while let Some(call) = pending.pop() {
            if actions_executed >= self.config.max_actions_per_turn {
                messages.push(format!(
                    "Paused after {actions_executed} actions this turn. Send another message to continue."
                ));
                break;
            }
            actions_executed += 1;
            record_audit_event(
                &mut document,
                "tool_call",
                json!({"tool": call.tool.as_str(), "arguments": call.arguments}),
            );
            let invocation = ToolInvocation {
                trip_id: trip_id.to_string(),
                tool: call.tool,
                arguments: call.arguments.clone(),
            };
            match self.handler.call(&invocation) {
                Ok(result) => {
                    apply_tool_result(&mut document, call.tool, &call.arguments, &result);
                    record_audit_event(
                        &mut document,
                        "tool_result",
                        json!({"tool": call.tool.as_str()}),
                    );
                    self.save(trip_id, &document)?;
                    if call.tool == ToolId::GenerateFollowupQuestions {
                        // Clarification ends the turn; reducing its result
                        // would just re-ask the same questions.
                        let questions = result
                            .get("questions")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        messages.extend(questions.iter().filter_map(Value::as_str).map(str::to_string));
                        break;
                    }
                    let next_event = if call.tool == ToolId::TripRequirementsExtract
                        && trip_state(&document) == Some(TripState::ReadyToQuote)
                    {
                        TripEvent::IntentReady
                    } else {
                        TripEvent::ToolResult {
                            tool_name: call.tool.as_str().to_string(),
                            result,
                        }
                    };
                    let mut next = reduce(&mut document, &next_event);
                    self.save(trip_id, &document)?;
                    messages.append(&mut next.messages);
                    pending = next.tool_calls;
                }
                Err(error) => {
                    record_audit_event(
                        &mut document,
                        "tool_error",
                        json!({"tool": call.tool.as_str(), "error": error.message}),
                    );
                    let mut next = reduce(
                        &mut document,
                        &TripEvent::ToolError {
                            tool_name: error.tool_name.clone(),
                            error: error.message.clone(),
                        },
                    );
                    self.save(trip_id, &document)?;
                    messages.append(&mut next.messages);
                    break;
                }
            }
        }

        self.save(trip_id, &document)?;
        Ok(TurnOutcome {
            trip_id: trip_id.to_string(),
            document,
            messages,
            actions_executed,
        })
    }

    fn get(&self, trip_id: &str) -> io::Result<Option<Value>> {
        self.store
            .lock()
            .map_err(|_| poisoned("store"))?
            .get(trip_id)
    }

    fn save(&self, trip_id: &str, document: &Value) -> io::Result<()> {
        self.store
            .lock()
            .map_err(|_| poisoned("store"))?
            .save(trip_id, document)
    }
}
