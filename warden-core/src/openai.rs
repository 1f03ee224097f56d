//! Wire schema for the external chat-completion API.
//!
//! This is a versioned data contract: every schema-specific field access in
//! the crate goes through these types, so provider format drift stays a
//! change local to this module. Unknown fields are tolerated on decode; the
//! persisted payload is the decoded document itself, not a re-serialization
//! of these structs.

use serde::{Deserialize, Serialize};

/// A chat-completion request as submitted to the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<WireMessage>,
}

/// A chat-completion response as returned by the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<WireChoice>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireChoice {
    #[serde(default)]
    pub index: u32,
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<WireContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
    /// Present on role=tool messages echoing a prior call; carried for
    /// schema completeness, not consumed by conversion.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// `content` is either a plain string or a multi-part array.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WireContentPart>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<WireImageUrl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireImageUrl {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub function: WireFunctionCall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    /// Raw JSON-encoded argument string, kept opaque.
    #[serde(default)]
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_string_content() {
        let raw = r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
        let request: ChatCompletionRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            request.messages[0].content,
            Some(WireContent::Text(_))
        ));
    }

    #[test]
    fn decodes_multi_part_content() {
        let raw = r#"{"messages":[{"role":"user","content":[
            {"type":"text","text":"look at this"},
            {"type":"image_url","image_url":{"url":"https://example.com/cat.png"}}
        ]}]}"#;
        let request: ChatCompletionRequest = serde_json::from_str(raw).unwrap();
        match &request.messages[0].content {
            Some(WireContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[1].kind, "image_url");
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn tolerates_unknown_fields() {
        let raw = r#"{"id":"cmpl-1","object":"chat.completion","created":1700000000,
            "choices":[{"index":0,"message":{"role":"assistant","content":"ok"},
            "finish_reason":"stop","logprobs":null}],"usage":{"total_tokens":3}}"#;
        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
