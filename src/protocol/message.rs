//! DAP message envelopes.
//!
//! Only the envelope is modelled; `arguments` and `body` stay as raw JSON so
//! that captured requests can be replayed to the backend unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single DAP message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl ProtocolMessage {
    pub fn seq(&self) -> i64 {
        match self {
            ProtocolMessage::Request(r) => r.seq,
            ProtocolMessage::Response(r) => r.seq,
            ProtocolMessage::Event(e) => e.seq,
        }
    }

    pub(crate) fn set_seq(&mut self, seq: i64) {
        match self {
            ProtocolMessage::Request(r) => r.seq = seq,
            ProtocolMessage::Response(r) => r.seq = seq,
            ProtocolMessage::Event(e) => e.seq = seq,
        }
    }

    /// Name under which the dispatcher publishes this message.
    ///
    /// `request_<command>`, `response_<command>` or `event_<event>`, e.g.
    /// `request_launch`, `response_disconnect`, `event_terminated`.
    pub fn event_name(&self) -> String {
        match self {
            ProtocolMessage::Request(r) => format!("request_{}", r.command),
            ProtocolMessage::Response(r) => format!("response_{}", r.command),
            ProtocolMessage::Event(e) => format!("event_{}", e.event),
        }
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            ProtocolMessage::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_event(self) -> Option<Event> {
        match self {
            ProtocolMessage::Event(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Request> for ProtocolMessage {
    fn from(request: Request) -> Self {
        ProtocolMessage::Request(request)
    }
}

impl From<Response> for ProtocolMessage {
    fn from(response: Response) -> Self {
        ProtocolMessage::Response(response)
    }
}

impl From<Event> for ProtocolMessage {
    fn from(event: Event) -> Self {
        ProtocolMessage::Event(event)
    }
}

/// Request sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: i64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    pub fn new(seq: i64, command: impl Into<String>) -> Self {
        Self {
            seq,
            command: command.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Look up a top-level argument.
    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.arguments.as_ref()?.get(key)
    }

    /// `disconnect` requests carry `restart: true` when the client restarts.
    pub fn requests_restart(&self) -> bool {
        self.argument("restart")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Response to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub seq: i64,
    pub request_seq: i64,
    pub command: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// Successful, empty-bodied response correlated to `request`.
    pub fn success_for(request: &Request) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            command: request.command.clone(),
            success: true,
            message: None,
            body: None,
        }
    }

    /// Failed response correlated to `request`.
    pub fn error_for(request: &Request, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            command: request.command.clone(),
            success: false,
            message: Some(message.into()),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Event emitted by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            seq: 0,
            event: event.into(),
            body: None,
        }
    }

    pub fn terminated() -> Self {
        Self::new("terminated")
    }

    /// `output` event shown to the user in the debug console.
    pub fn output(category: &str, text: impl Into<String>) -> Self {
        Self {
            seq: 0,
            event: "output".to_string(),
            body: Some(serde_json::json!({"category": category, "output": text.into()})),
        }
    }

    /// `systemProcessId` of a `process` event.
    pub fn system_process_id(&self) -> Option<u32> {
        self.body
            .as_ref()?
            .get("systemProcessId")?
            .as_u64()
            .and_then(|pid| u32::try_from(pid).ok())
    }
}
