//! Wire protocol for the hostlink control plane.
//!
//! The server listens on `127.0.0.1:<port>`. Each connection carries exactly
//! one newline-delimited JSON request and one newline-delimited JSON
//! response, after which the server closes the connection:
//!
//! ```json
//! // Request
//! {"version":1,"request_id":"5d0c…","tool":"tests_run_single","arguments":{"test_name":"Foo.Bar"}}
//! // Response
//! {"version":1,"request_id":"5d0c…","status":"ok","message":"Test run started","payload":{"identifier":"…"}}
//! ```
//!
//! `status` is `ok`, `warning` (request understood but nothing was done, e.g.
//! the operation is already running) or `error` (invalid request or an
//! infrastructure failure).

use serde::{Deserialize, Serialize};

/// Protocol version for the control-plane JSON protocol.
pub const PROTOCOL_VERSION: u32 = 1;

/// Name of the built-in command that lists the registered tools.
pub const TOOLS_LIST: &str = "tools_list";

/// A request sent from a client to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Protocol version. Must be [`PROTOCOL_VERSION`].
    pub version: u32,
    /// Unique identifier echoed back in the response.
    #[serde(default)]
    pub request_id: String,
    /// Tool to invoke (e.g. `"build_trigger"`).
    pub tool: String,
    /// Tool-specific arguments; `null` and a missing field both mean `{}`.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: new_request_id(),
            tool: tool.into(),
            arguments,
        }
    }
}

/// Outcome classification of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Warning,
    Error,
}

/// A response sent by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub version: u32,
    /// Echoed `request_id` from the request (empty if the request was unreadable).
    pub request_id: String,
    pub status: ToolStatus,
    /// Human-readable summary.
    pub message: String,
    /// Structured result data, if the tool returns any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ToolResponse {
    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }

    pub fn is_warning(&self) -> bool {
        self.status == ToolStatus::Warning
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// Look up a top-level payload field.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.as_ref().and_then(|p| p.get(key))
    }
}

/// Mint a request identifier (UUID v4).
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_arguments_default_to_null() {
        let req: ToolRequest =
            serde_json::from_str(r#"{"version":1,"request_id":"r1","tool":"build_status"}"#)
                .unwrap();
        assert_eq!(req.tool, "build_status");
        assert!(req.arguments.is_null());
    }

    #[test]
    fn test_new_request_mints_unique_ids() {
        let a = ToolRequest::new("build_trigger", json!({}));
        let b = ToolRequest::new("build_trigger", json!({}));
        assert_eq!(a.version, PROTOCOL_VERSION);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_response_omits_missing_payload() {
        let resp = ToolResponse {
            version: PROTOCOL_VERSION,
            request_id: "r1".to_string(),
            status: ToolStatus::Warning,
            message: "Build already running".to_string(),
            payload: None,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["status"], "warning");
        assert!(value.get("payload").is_none());
        assert!(resp.is_warning());
    }

    #[test]
    fn test_response_field_lookup() {
        let resp: ToolResponse = serde_json::from_value(json!({
            "version": 1,
            "request_id": "r2",
            "status": "ok",
            "message": "Build started",
            "payload": {"identifier": "abc"}
        }))
        .unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.field("identifier"), Some(&json!("abc")));
        assert_eq!(resp.field("missing"), None);
    }
}
