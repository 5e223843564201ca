//! Reply text extraction. Providers behind the gateway do not agree on one response shape,
//! so each known shape is probed in a fixed priority order and the first hit wins.

use crate::llm::GatewayError;
use serde_json::Value;

/// Known places the reply text can live in a gateway response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `choices[0].message.content` (chat completions)
    ChatMessage,
    /// `choices[0].text` (legacy completions)
    CompletionText,
    /// `choices[0].delta.content` (a single streaming delta returned whole)
    Delta,
    /// top-level `response`
    Response,
    /// top-level `content`
    Content,
    /// the body is a bare JSON string
    BareString,
}

impl ResponseShape {
    pub const PRIORITY: [ResponseShape; 6] = [
        ResponseShape::ChatMessage,
        ResponseShape::CompletionText,
        ResponseShape::Delta,
        ResponseShape::Response,
        ResponseShape::Content,
        ResponseShape::BareString,
    ];

    /// Non-empty text at this shape's location, if present.
    pub fn extract<'a>(&self, body: &'a Value) -> Option<&'a str> {
        let found = match self {
            ResponseShape::ChatMessage => body.pointer("/choices/0/message/content"),
            ResponseShape::CompletionText => body.pointer("/choices/0/text"),
            ResponseShape::Delta => body.pointer("/choices/0/delta/content"),
            ResponseShape::Response => body.get("response"),
            ResponseShape::Content => body.get("content"),
            ResponseShape::BareString => Some(body),
        };
        found
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Parse a raw response body and return the reply text from the first matching shape.
pub fn extract_content(body: &str) -> Result<String, GatewayError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GatewayError::Content(format!("malformed response body: {}", e)))?;
    for shape in ResponseShape::PRIORITY {
        if let Some(text) = shape.extract(&value) {
            log::debug!("gateway: reply text found at {:?}", shape);
            return Ok(text.to_string());
        }
    }
    Err(GatewayError::Content(
        "no text field in any known response shape".to_string(),
    ))
}
