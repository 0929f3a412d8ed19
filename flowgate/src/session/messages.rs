//! Wire frames exchanged with agents

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message types the control plane sends to an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    AddLimiters,
    UpdateLimiters,
    DeleteLimiters,
    AddService,
    UpdateService,
    DeleteService,
    PauseService,
    ResumeService,
    AddChains,
    UpdateChains,
    DeleteChains,
    /// Ask the agent to TCP-ping a target
    TcpPing,
    /// One-shot acknowledgement of agent telemetry
    Call,
}

impl MessageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddLimiters => "AddLimiters",
            Self::UpdateLimiters => "UpdateLimiters",
            Self::DeleteLimiters => "DeleteLimiters",
            Self::AddService => "AddService",
            Self::UpdateService => "UpdateService",
            Self::DeleteService => "DeleteService",
            Self::PauseService => "PauseService",
            Self::ResumeService => "ResumeService",
            Self::AddChains => "AddChains",
            Self::UpdateChains => "UpdateChains",
            Self::DeleteChains => "DeleteChains",
            Self::TcpPing => "TcpPing",
            Self::Call => "call",
        }
    }
}

/// Control-to-agent frame: `{type, data, requestId?}`
#[derive(Debug, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl OutboundFrame {
    #[must_use]
    pub fn request(kind: MessageType, data: Value, request_id: String) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data,
            request_id: Some(request_id),
        }
    }

    #[must_use]
    pub fn push(kind: MessageType, data: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data,
            request_id: None,
        }
    }
}

/// Agent-to-control frame.
///
/// Three shapes share this struct: a correlated response carries
/// `requestId` + `success`; telemetry carries `type` + `data`; anything
/// else is an untyped push.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Resolved reply delivered to a correlation slot
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
}

impl From<&InboundFrame> for AgentReply {
    fn from(frame: &InboundFrame) -> Self {
        Self {
            success: frame.success.unwrap_or(false),
            message: frame.message.clone().unwrap_or_default(),
            data: frame.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_request_serializes_request_id() {
        let frame = OutboundFrame::request(
            MessageType::AddService,
            json!([{"name": "1_2_3_tcp"}]),
            "abc".to_string(),
        );
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"AddService\""));
        assert!(text.contains("\"requestId\":\"abc\""));
    }

    #[test]
    fn test_outbound_push_omits_request_id() {
        let frame = OutboundFrame::push(MessageType::Call, json!("ok"));
        let text = serde_json::to_string(&frame).unwrap();
        assert!(!text.contains("requestId"));
        assert!(text.contains("\"type\":\"call\""));
    }

    #[test]
    fn test_inbound_response_shape() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"requestId":"r1","success":true,"message":"done","data":{"x":1}}"#,
        )
        .unwrap();
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
        let reply = AgentReply::from(&frame);
        assert!(reply.success);
        assert_eq!(reply.message, "done");
    }

    #[test]
    fn test_inbound_telemetry_shape() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"info","data":{"memory_usage":12.5}}"#).unwrap();
        assert!(frame.request_id.is_none());
        assert_eq!(frame.kind.as_deref(), Some("info"));
    }
}
