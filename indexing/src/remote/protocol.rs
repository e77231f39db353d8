//! Wire format for the remote MCP index service.
//!
//! Requests are JSON-RPC 2.0 bodies POSTed to a single endpoint. Responses
//! come back as a text event stream:
//!
//! ```text
//! event: message\r\n
//! data: {"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"{...}"}]}}\r\n
//! \r\n
//! ```
//!
//! The tool result's text is itself a JSON document carrying `statusCode`
//! and a `data` array whose first entry holds `index_value`.

use serde::Serialize;
use serde_json::{json, Value};

use super::RemoteError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const ACCEPT_TYPES: &str = "application/json, text/event-stream";
pub const DATA_PREFIX: &str = "data: ";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Tool exposing the statistical datasets.
pub const DATA_TOOL: &str = "4_get_data";
/// Major group code for WPI "All Commodities".
pub const ALL_COMMODITIES_GROUP: &str = "1000000000";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    /// Absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'static str,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn initialize(id: u64, client_name: &str, client_version: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: METHOD_INITIALIZE,
            params: json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": client_name, "version": client_version },
            }),
        }
    }

    pub fn initialized() -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: METHOD_INITIALIZED,
            params: json!({}),
        }
    }

    /// `tools/call` for one month of the WPI all-commodities series.
    pub fn wpi_query(id: u64, year: i32, month: u32) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: METHOD_TOOLS_CALL,
            params: json!({
                "name": DATA_TOOL,
                "arguments": {
                    "dataset": "WPI",
                    "filters": {
                        "year": year.to_string(),
                        "month_code": month.to_string(),
                        "major_group_code": ALL_COMMODITIES_GROUP,
                    },
                },
            }),
        }
    }
}

/// First `data: ` line of an event stream, prefix stripped.
pub fn event_data(body: &str) -> Option<&str> {
    body.lines()
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| line.starts_with(DATA_PREFIX))
        .map(|line| line[DATA_PREFIX.len()..].trim())
}

/// Decode the JSON-RPC envelope from a response body.
///
/// Plain `application/json` replies (no event framing) are accepted too.
pub fn parse_envelope(body: &str) -> Result<Value, RemoteError> {
    let payload = match event_data(body) {
        Some(data) => data,
        None if body.trim_start().starts_with('{') => body.trim(),
        None => return Err(RemoteError::Protocol("no data line in event stream".into())),
    };
    serde_json::from_str(payload)
        .map_err(|e| RemoteError::Protocol(format!("invalid envelope JSON: {e}")))
}

/// Pull the index reading out of a decoded envelope.
///
/// `Ok(None)` means the server answered but has no value for the request.
pub fn extract_index_value(envelope: &Value) -> Result<Option<f64>, RemoteError> {
    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        return Err(RemoteError::Rpc(error.to_string()));
    }

    let Some(result) = envelope.get("result").filter(|r| !r.is_null()) else {
        return Ok(None);
    };

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Ok(None);
    }

    if let Some(content) = result.get("content").and_then(Value::as_array) {
        let Some(text) = content.first().and_then(|c| c.get("text")).and_then(Value::as_str)
        else {
            return Ok(None);
        };
        let inner: Value = serde_json::from_str(text)
            .map_err(|e| RemoteError::Protocol(format!("invalid tool result JSON: {e}")))?;
        if !is_truthy(inner.get("statusCode")) {
            return Ok(None);
        }
        return Ok(first_index_value(inner.get("data")));
    }

    Ok(first_index_value(result.get("data")))
}

fn first_index_value(data: Option<&Value>) -> Option<f64> {
    data.and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("index_value"))
        .and_then(parse_index_value)
}

fn parse_index_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (parsed.is_finite() && parsed > 0.0).then_some(parsed)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        Some(Value::Null) | None => false,
    }
}
