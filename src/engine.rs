//! A small JSON-RPC engine standing in for a real debugger backend.
//!
//! | Method | Effect |
//! |--------|--------|
//! | `Runtime.run` | acknowledged |
//! | `Runtime.evaluate` | returns the current tick |
//! | `Debugger.enable` | acknowledged |
//! | `Debugger.pause` | program pauses before its next tick |
//! | `Debugger.resume` | leaves the pause loop, emits `Debugger.resumed` |

use std::rc::Rc;

use inspector_agent::{Channel, ProtocolEngine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::program::ProgramState;

const METHOD_NOT_FOUND: i64 = -32601;
const PARSE_ERROR: i64 = -32700;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Breakpoint,
    Other,
}

impl PauseReason {
    fn as_str(self) -> &'static str {
        match self {
            PauseReason::Breakpoint => "breakpoint",
            PauseReason::Other => "other",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct Reply {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Reply {
    fn result(id: Value, result: Value) -> String {
        Reply {
            id,
            result: Some(result),
            error: None,
        }
        .encode()
    }

    fn error(id: Value, code: i64, message: String) -> String {
        Reply {
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
        .encode()
    }

    fn encode(&self) -> String {
        // Value, String and i64 fields always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What handling one message produced
#[derive(Debug, Default, PartialEq)]
struct Outcome {
    messages: Vec<String>,
    resume: bool,
}

pub fn paused_notification(reason: PauseReason, tick: u64) -> String {
    json!({
        "method": "Debugger.paused",
        "params": { "reason": reason.as_str(), "tick": tick },
    })
    .to_string()
}

pub struct DemoEngine {
    state: Rc<ProgramState>,
    channel: Option<Channel>,
}

impl DemoEngine {
    pub fn new(state: Rc<ProgramState>) -> Self {
        DemoEngine {
            state,
            channel: None,
        }
    }

    /// `paused` is whether the program is parked in the pause loop
    fn handle(&self, message: &str, paused: bool) -> Outcome {
        let request: Request = match serde_json::from_str(message) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "malformed request");
                return Outcome {
                    messages: vec![Reply::error(Value::Null, PARSE_ERROR, e.to_string())],
                    resume: false,
                };
            }
        };
        trace!(method = %request.method, "request");

        let mut outcome = Outcome::default();
        let reply = match request.method.as_str() {
            "Runtime.run" | "Debugger.enable" => Reply::result(request.id, json!({})),
            "Runtime.evaluate" => Reply::result(
                request.id,
                json!({ "result": { "type": "number", "value": self.state.tick() } }),
            ),
            "Debugger.pause" => {
                // Already stopped; a request now would re-pause right after resume
                if !paused {
                    self.state.request_pause();
                }
                Reply::result(request.id, json!({}))
            }
            "Debugger.resume" => {
                outcome.resume = true;
                Reply::result(request.id, json!({}))
            }
            other => Reply::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("'{}' wasn't found", other),
            ),
        };
        outcome.messages.push(reply);
        if outcome.resume {
            outcome
                .messages
                .push(json!({ "method": "Debugger.resumed", "params": {} }).to_string());
        }
        outcome
    }
}

impl ProtocolEngine for DemoEngine {
    fn connect_frontend(&mut self, channel: Channel) {
        self.state.attach(channel.clone());
        self.channel = Some(channel);
    }

    fn dispatch_message(&mut self, message: &str) {
        let paused = self.channel.as_ref().is_some_and(Channel::is_paused);
        let outcome = self.handle(message, paused);
        let Some(channel) = &self.channel else {
            return;
        };
        for reply in outcome.messages {
            channel.send_to_frontend(reply);
        }
        if outcome.resume {
            channel.quit_message_loop_on_pause();
        }
    }

    fn disconnect_frontend(&mut self) {
        self.state.detach();
        self.channel = None;
    }
}
