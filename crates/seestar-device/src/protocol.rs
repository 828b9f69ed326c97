//! JSON line protocol for the event and image sockets
//!
//! Inbound: one JSON object per `\r\n`-terminated line, either an
//! unsolicited event (tagged `Event` or `event`) or a reply to one of our
//! requests. Outbound: `{"id": .., "method": .., "params": ..}` requests.

use serde_json::{json, Map, Value};

use seestar_core::events::{CommandResponse, DeviceMessage, EventEnvelope, EventKind, Lifecycle};
use seestar_core::prelude::*;

/// Line terminator the device expects on requests
pub const LINE_TERMINATOR: &str = "\r\n";

const KIND_KEYS: [&str; 2] = ["Event", "event"];
const ROUTE_KEY: &str = "route";

// ─────────────────────────────────────────────────────────
// Inbound parsing (free functions)
// ─────────────────────────────────────────────────────────

/// Classify one line from the device.
///
/// Lines with a kind tag become events; lines carrying `id`, `method`,
/// `result` or `error` without a kind tag are command replies. Anything
/// else is a [`Error::MalformedEnvelope`].
pub fn parse_device_message(line: &str) -> Result<DeviceMessage> {
    let object = parse_object(line)?;

    if KIND_KEYS.iter().any(|key| object.contains_key(*key)) {
        return envelope_from_object(object).map(DeviceMessage::Event);
    }

    if ["id", "method", "result", "error"]
        .iter()
        .any(|key| object.contains_key(*key))
    {
        return Ok(DeviceMessage::Response(response_from_object(object)));
    }

    Err(Error::malformed("object has neither an event kind nor a request id"))
}

/// Parse one event line. Command replies are rejected.
pub fn parse_envelope(line: &str) -> Result<EventEnvelope> {
    match parse_device_message(line)? {
        DeviceMessage::Event(envelope) => Ok(envelope),
        DeviceMessage::Response(response) => Err(Error::malformed(format!(
            "expected an event, got a reply to {}",
            response.method.as_deref().unwrap_or("unknown method")
        ))),
    }
}

fn parse_object(line: &str) -> Result<Map<String, Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(Error::malformed("empty line"));
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(Error::malformed(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(Error::malformed(format!("invalid JSON: {e}"))),
    }
}

fn envelope_from_object(mut object: Map<String, Value>) -> Result<EventEnvelope> {
    let mut kind = None;
    for key in KIND_KEYS {
        if let Some(value) = object.remove(key) {
            match value {
                Value::String(name) if !name.is_empty() => kind = Some(name),
                other => {
                    return Err(Error::malformed(format!(
                        "event kind must be a non-empty string, got {}",
                        json_type_name(&other)
                    )))
                }
            }
        }
    }
    let kind = kind.ok_or_else(|| Error::malformed("missing event kind"))?;

    let route = match object.remove(ROUTE_KEY) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(steps)) => steps
            .into_iter()
            .map(|step| match step {
                Value::String(s) => Ok(s),
                other => Err(Error::malformed(format!(
                    "route element must be a string, got {}",
                    json_type_name(&other)
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(Error::malformed(format!(
                "route must be an array, got {}",
                json_type_name(&other)
            )))
        }
    };

    let timestamp = object.get("Timestamp").and_then(parse_timestamp);
    let state = object
        .get("state")
        .and_then(Value::as_str)
        .map(Lifecycle::parse);
    let error = match object.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    let code = object.get("code").and_then(Value::as_i64);

    Ok(EventEnvelope {
        kind: EventKind::from_name(&kind),
        timestamp,
        state,
        route,
        error,
        code,
        fields: object,
    })
}

fn response_from_object(object: Map<String, Value>) -> CommandResponse {
    CommandResponse {
        id: object.get("id").cloned(),
        method: object
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string),
        result: object.get("result").cloned(),
        error: object.get("error").filter(|e| !e.is_null()).cloned(),
        code: object.get("code").and_then(Value::as_i64),
    }
}

/// The device sends `Timestamp` as a decimal string; numbers are accepted too.
fn parse_timestamp(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────
// Outbound requests
// ─────────────────────────────────────────────────────────

/// Generic request for the event socket
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub method: String,
    pub params: Option<Value>,
}

impl DeviceCommand {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Serialized request line, terminator included
    pub fn build(&self, id: u64) -> String {
        let mut request = json!({
            "id": id,
            "method": self.method,
        });
        if let (Some(params), Some(object)) = (&self.params, request.as_object_mut()) {
            object.insert("params".to_string(), params.clone());
        }
        format!("{request}{LINE_TERMINATOR}")
    }
}

/// Requests understood by the image socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCommand {
    /// Keepalive
    TestConnection,
    /// Push frames until stopped
    BeginStreaming,
    StopStreaming,
    /// Send the current stacked result once
    GetStackedImage,
    /// Send the current preview frame once
    GetCurrentImage,
}

impl ImageCommand {
    /// Image socket requests carry a fixed id; replies are not correlated.
    pub const REQUEST_ID: u64 = 2;

    pub fn method(&self) -> &'static str {
        match self {
            ImageCommand::TestConnection => "test_connection",
            ImageCommand::BeginStreaming => "begin_streaming",
            ImageCommand::StopStreaming => "stop_streaming",
            ImageCommand::GetStackedImage => "get_stacked_img",
            ImageCommand::GetCurrentImage => "get_current_img",
        }
    }

    pub fn build(&self) -> String {
        DeviceCommand::new(self.method()).build(Self::REQUEST_ID)
    }
}
