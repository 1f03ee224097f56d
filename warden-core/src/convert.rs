//! Chat-exchange ingestion pipeline.
//!
//! Decodes an externally-formatted request/response pair, reconciles the
//! request messages against history already recorded for the run, converts
//! model output into message/choice/tool-call records, and persists the lot
//! through the `Store` in one logical write.
//!
//! Ordering is a caller responsibility: within one run, ingestion calls must
//! arrive in conversation order and not overlap, or the prefix-cut filter
//! will mis-count. The pipeline does not serialize callers itself.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;
use uuid::Uuid;

use crate::error::ReviewError;
use crate::openai::{
    ChatCompletionRequest, ChatCompletionResponse, WireContent, WireMessage, WireToolCall,
};
use crate::store::Store;
use crate::types::*;

/// Provider tag recorded on every chat created by this pipeline.
const PROVIDER: &str = "openai";

/// Converts chat exchanges into the internal entity graph.
pub struct ChatPipeline {
    store: Arc<dyn Store>,
}

impl ChatPipeline {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Ingest one exchange: `request_data` and `response_data` are
    /// base64-encoded JSON documents in the chat-completion wire format.
    /// Returns the identifier projection covering the new chat, every choice
    /// and every tool call. Fail-fast: any error leaves nothing persisted.
    pub async fn ingest(
        &self,
        run_id: Uuid,
        request_data: &str,
        response_data: &str,
    ) -> Result<ChatIds, ReviewError> {
        if self.store.get_run(run_id).await?.is_none() {
            return Err(ReviewError::NotFound {
                kind: crate::error::EntityKind::Run,
                id: run_id,
            });
        }

        let (request_json, request): (_, ChatCompletionRequest) =
            decode_document(request_data, "request")?;
        let request_messages = self.convert_messages(&request.messages, run_id).await?;
        let new_messages = self.filter_logged_messages(request_messages, run_id).await?;

        let (response_json, response): (_, ChatCompletionResponse) =
            decode_document(response_data, "response")?;
        let choices = self.convert_choices(&response.choices, run_id).await?;

        let chat_id = self
            .store
            .create_chat(
                run_id,
                PROVIDER,
                &request_json,
                &response_json,
                &choices,
                &new_messages,
            )
            .await?;

        debug!(
            %run_id,
            %chat_id,
            new_messages = new_messages.len(),
            choices = choices.len(),
            "chat exchange ingested"
        );

        Ok(project_ids(chat_id, &choices))
    }

    /// Drop the leading messages that were already logged for this run. The
    /// incoming list is assumed to replay recorded history as an identical,
    /// order-stable prefix; this is a prefix cut, not a content diff, and
    /// there is no defense against upstream reordering or edits.
    async fn filter_logged_messages(
        &self,
        messages: Vec<Message>,
        run_id: Uuid,
    ) -> Result<Vec<Message>, ReviewError> {
        let logged = self.store.messages_for_run(run_id).await?.len();
        if logged > messages.len() {
            return Err(ReviewError::InvalidInput(format!(
                "request carries {} messages but {logged} are already logged for this run",
                messages.len()
            )));
        }
        Ok(messages.into_iter().skip(logged).collect())
    }

    async fn convert_messages(
        &self,
        wire: &[WireMessage],
        run_id: Uuid,
    ) -> Result<Vec<Message>, ReviewError> {
        let mut converted = Vec::with_capacity(wire.len());
        for message in wire {
            converted.push(self.convert_message(message, run_id).await?);
        }
        Ok(converted)
    }

    async fn convert_message(
        &self,
        wire: &WireMessage,
        run_id: Uuid,
    ) -> Result<Message, ReviewError> {
        let role = MessageRole::parse(&wire.role).ok_or_else(|| {
            ReviewError::InvalidInput(format!("unknown message role: {:?}", wire.role))
        })?;

        let tool_calls = match &wire.tool_calls {
            Some(calls) => Some(self.convert_tool_calls(calls, run_id).await?),
            None => None,
        };

        // Single content type per message: for multi-part content the last
        // image part wins; a multi-part message without one collapses to an
        // empty text message.
        let (kind, content) = match &wire.content {
            Some(WireContent::Text(text)) => (MessageKind::Text, text.clone()),
            Some(WireContent::Parts(parts)) => {
                let mut image: Option<&str> = None;
                for part in parts {
                    if part.kind == "image_url" {
                        let url = part.image_url.as_ref().ok_or_else(|| {
                            ReviewError::InvalidInput(
                                "image_url content part carries no image payload".to_string(),
                            )
                        })?;
                        image = Some(&url.url);
                    }
                }
                match image {
                    Some(url) => (MessageKind::ImageUrl, url.to_string()),
                    None => (MessageKind::Text, String::new()),
                }
            }
            None => (MessageKind::Text, String::new()),
        };

        Ok(Message {
            id: Uuid::new_v4(),
            role,
            kind,
            content,
            tool_calls,
        })
    }

    async fn convert_choices(
        &self,
        wire: &[crate::openai::WireChoice],
        run_id: Uuid,
    ) -> Result<Vec<Choice>, ReviewError> {
        let mut converted = Vec::with_capacity(wire.len());
        for choice in wire {
            let message = self.convert_message(&choice.message, run_id).await?;
            converted.push(Choice {
                id: Uuid::new_v4(),
                index: choice.index,
                message,
                finish_reason: FinishReason::from(
                    choice.finish_reason.clone().unwrap_or_default(),
                ),
            });
        }
        Ok(converted)
    }

    /// Resolve each wire tool call against the tools registered for the run.
    /// A name with no registered tool fails the whole ingestion.
    async fn convert_tool_calls(
        &self,
        wire: &[WireToolCall],
        run_id: Uuid,
    ) -> Result<Vec<ToolCall>, ReviewError> {
        let mut converted = Vec::with_capacity(wire.len());
        for call in wire {
            let tool = self
                .store
                .get_tool_by_name(run_id, &call.function.name)
                .await?
                .ok_or_else(|| ReviewError::ToolNotFound(call.function.name.clone()))?;
            converted.push(ToolCall {
                id: Uuid::new_v4(),
                tool_id: tool.id,
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            });
        }
        Ok(converted)
    }
}

/// base64 → JSON → typed schema. The returned `Value` is what gets
/// persisted, so unknown provider fields survive storage; the typed document
/// exists to validate and to feed conversion.
fn decode_document<T: serde::de::DeserializeOwned>(
    encoded: &str,
    label: &str,
) -> Result<(serde_json::Value, T), ReviewError> {
    let bytes = STANDARD.decode(encoded).map_err(|err| {
        ReviewError::InvalidInput(format!("invalid base64 in {label}: {err}"))
    })?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|err| {
        ReviewError::InvalidInput(format!("invalid JSON in {label}: {err}"))
    })?;
    let typed: T = serde_json::from_value(value.clone()).map_err(|err| {
        ReviewError::InvalidInput(format!("{label} does not match the chat-completion schema: {err}"))
    })?;
    Ok((value, typed))
}

/// Build the id projection for one ingestion: the chat id, and for each
/// choice its id, its message id and every tool call's (id, tool id) pair.
fn project_ids(chat_id: Uuid, choices: &[Choice]) -> ChatIds {
    let choice_ids = choices
        .iter()
        .map(|choice| ChoiceIds {
            choice_id: choice.id,
            message_id: choice.message.id,
            tool_call_ids: choice
                .message
                .tool_calls
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|call| ToolCallIds {
                    tool_call_id: call.id,
                    tool_id: call.tool_id,
                })
                .collect(),
        })
        .collect();

    ChatIds {
        chat_id,
        choice_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use serde_json::json;

    fn encode(document: &serde_json::Value) -> String {
        STANDARD.encode(serde_json::to_vec(document).unwrap())
    }

    fn request_with_messages(messages: serde_json::Value) -> String {
        encode(&json!({ "model": "gpt-4o", "messages": messages }))
    }

    fn response_with_choices(choices: serde_json::Value) -> String {
        encode(&json!({ "id": "cmpl-1", "model": "gpt-4o", "choices": choices }))
    }

    fn plain_response() -> String {
        response_with_choices(json!([{
            "index": 0,
            "message": { "role": "assistant", "content": "done" },
            "finish_reason": "stop"
        }]))
    }

    async fn seeded_pipeline() -> (Arc<MemoryStore>, ChatPipeline, Uuid, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let run = store.create_run().await.unwrap();
        let tool = store
            .create_tool(run.id, "read_file", "read a file from disk")
            .await
            .unwrap();
        let pipeline = ChatPipeline::new(store.clone());
        (store, pipeline, run.id, tool.id)
    }

    #[tokio::test]
    async fn ingests_a_plain_exchange() {
        let (store, pipeline, run_id, _) = seeded_pipeline().await;

        let request = request_with_messages(json!([
            { "role": "system", "content": "be careful" },
            { "role": "user", "content": "hello" }
        ]));
        let ids = pipeline
            .ingest(run_id, &request, &plain_response())
            .await
            .unwrap();

        assert_eq!(ids.choice_ids.len(), 1);
        assert!(ids.choice_ids[0].tool_call_ids.is_empty());

        // Two request messages plus the picked choice's assistant message.
        let logged = store.messages_for_run(run_id).await.unwrap();
        assert_eq!(logged.len(), 3);
        assert_eq!(logged[2].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn prefix_cut_persists_only_new_messages() {
        let (store, pipeline, run_id, _) = seeded_pipeline().await;

        // Two messages already logged for the run.
        let history = vec![
            Message {
                id: Uuid::new_v4(),
                role: MessageRole::System,
                kind: MessageKind::Text,
                content: "be careful".to_string(),
                tool_calls: None,
            },
            Message {
                id: Uuid::new_v4(),
                role: MessageRole::User,
                kind: MessageKind::Text,
                content: "hello".to_string(),
                tool_calls: None,
            },
        ];
        store
            .create_chat(run_id, "openai", &json!({}), &json!({}), &[], &history)
            .await
            .unwrap();

        // Re-ingest the same two plus one new message.
        let request = request_with_messages(json!([
            { "role": "system", "content": "be careful" },
            { "role": "user", "content": "hello" },
            { "role": "user", "content": "now delete it" }
        ]));
        pipeline
            .ingest(run_id, &request, &plain_response())
            .await
            .unwrap();

        let logged = store.messages_for_run(run_id).await.unwrap();
        // 2 history + 1 new + 1 assistant choice message.
        assert_eq!(logged.len(), 4);
        assert_eq!(logged[2].content, "now delete it");
        assert_eq!(logged[3].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn more_logged_than_sent_is_invalid_input() {
        let (store, pipeline, run_id, _) = seeded_pipeline().await;

        let history: Vec<Message> = (0..3)
            .map(|n| Message {
                id: Uuid::new_v4(),
                role: MessageRole::User,
                kind: MessageKind::Text,
                content: format!("turn {n}"),
                tool_calls: None,
            })
            .collect();
        store
            .create_chat(run_id, "openai", &json!({}), &json!({}), &[], &history)
            .await
            .unwrap();

        let request = request_with_messages(json!([
            { "role": "user", "content": "turn 0" }
        ]));
        let err = pipeline
            .ingest(run_id, &request, &plain_response())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn resolves_tool_calls_and_projects_every_id() {
        let (store, pipeline, run_id, tool_id) = seeded_pipeline().await;

        let request = request_with_messages(json!([
            { "role": "user", "content": "read both files" }
        ]));
        let response = response_with_choices(json!([{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    { "id": "call_1", "type": "function",
                      "function": { "name": "read_file", "arguments": "{\"path\":\"a\"}" } },
                    { "id": "call_2", "type": "function",
                      "function": { "name": "read_file", "arguments": "{\"path\":\"b\"}" } }
                ]
            },
            "finish_reason": "tool_calls"
        }]));

        let ids = pipeline.ingest(run_id, &request, &response).await.unwrap();
        assert_eq!(ids.choice_ids.len(), 1);
        let tool_call_ids = &ids.choice_ids[0].tool_call_ids;
        assert_eq!(tool_call_ids.len(), 2);
        assert!(tool_call_ids.iter().all(|tc| tc.tool_id == tool_id));

        // Every projected tool call is retrievable.
        for tc in tool_call_ids {
            let stored = store.get_tool_call(tc.tool_call_id).await.unwrap().unwrap();
            assert_eq!(stored.name, "read_file");
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_the_whole_ingestion() {
        let (store, pipeline, run_id, _) = seeded_pipeline().await;

        let request = request_with_messages(json!([
            { "role": "user", "content": "launch" }
        ]));
        let response = response_with_choices(json!([{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    { "id": "call_1", "type": "function",
                      "function": { "name": "not_registered", "arguments": "{}" } }
                ]
            },
            "finish_reason": "tool_calls"
        }]));

        let err = pipeline.ingest(run_id, &request, &response).await.unwrap_err();
        assert!(matches!(err, ReviewError::ToolNotFound(name) if name == "not_registered"));

        // Nothing persisted: no messages, no chat side effects.
        assert!(store.messages_for_run(run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_image_part_wins() {
        let (_, pipeline, run_id, _) = seeded_pipeline().await;

        let request = request_with_messages(json!([
            { "role": "user", "content": [
                { "type": "image_url", "image_url": { "url": "https://example.com/first.png" } },
                { "type": "text", "text": "compare these" },
                { "type": "image_url", "image_url": { "url": "https://example.com/second.png" } }
            ]}
        ]));
        let ids = pipeline
            .ingest(run_id, &request, &plain_response())
            .await
            .unwrap();
        assert_eq!(ids.choice_ids.len(), 1);

        let store_messages = pipeline.store.messages_for_run(run_id).await.unwrap();
        assert_eq!(store_messages[0].kind, MessageKind::ImageUrl);
        assert_eq!(store_messages[0].content, "https://example.com/second.png");
    }

    #[tokio::test]
    async fn multi_part_without_image_is_empty_text() {
        let (store, pipeline, run_id, _) = seeded_pipeline().await;

        let request = request_with_messages(json!([
            { "role": "user", "content": [ { "type": "text", "text": "just text" } ] }
        ]));
        pipeline
            .ingest(run_id, &request, &plain_response())
            .await
            .unwrap();

        let logged = store.messages_for_run(run_id).await.unwrap();
        assert_eq!(logged[0].kind, MessageKind::Text);
        assert_eq!(logged[0].content, "");
    }

    #[tokio::test]
    async fn unknown_finish_reason_is_preserved() {
        let (_, pipeline, run_id, _) = seeded_pipeline().await;

        let wire: Vec<crate::openai::WireChoice> = serde_json::from_value(json!([{
            "index": 2,
            "message": { "role": "assistant", "content": "ok" },
            "finish_reason": "eos_token"
        }]))
        .unwrap();
        let choices = pipeline.convert_choices(&wire, run_id).await.unwrap();
        assert_eq!(choices[0].index, 2);
        assert_eq!(
            choices[0].finish_reason,
            FinishReason::Other("eos_token".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_role_is_invalid_input() {
        let (_, pipeline, run_id, _) = seeded_pipeline().await;

        let request = request_with_messages(json!([
            { "role": "narrator", "content": "meanwhile" }
        ]));
        let err = pipeline
            .ingest(run_id, &request, &plain_response())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn bad_base64_and_bad_json_are_invalid_input() {
        let (_, pipeline, run_id, _) = seeded_pipeline().await;

        let err = pipeline
            .ingest(run_id, "not-base64!!!", &plain_response())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidInput(_)));

        let garbage = STANDARD.encode(b"{not json");
        let err = pipeline
            .ingest(run_id, &garbage, &plain_response())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = ChatPipeline::new(store);
        let request = request_with_messages(json!([]));
        let err = pipeline
            .ingest(Uuid::new_v4(), &request, &plain_response())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotFound { .. }));
    }
}
