use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Roles and content kinds ──────────────────────────────────

/// Conversation role of a message. Closed set; an unknown role string on the
/// wire is an ingestion error, not a new variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// Content classification of a message. One content type per message: a
/// multi-part wire message carrying an image collapses to `ImageUrl`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    ImageUrl,
}

// ─── Finish reasons ───────────────────────────────────────────

/// Why the model stopped generating a choice. Provider strings outside the
/// known set are preserved verbatim in `Other` so format drift never loses
/// data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
    Other(String),
}

impl From<String> for FinishReason {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            "function_call" => Self::FunctionCall,
            _ => Self::Other(raw),
        }
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => "stop".to_string(),
            FinishReason::Length => "length".to_string(),
            FinishReason::ToolCalls => "tool_calls".to_string(),
            FinishReason::ContentFilter => "content_filter".to_string(),
            FinishReason::FunctionCall => "function_call".to_string(),
            FinishReason::Other(raw) => raw,
        }
    }
}

// ─── Statuses ─────────────────────────────────────────────────

/// Current state of one chain execution. Transition rules live in the
/// store/supervisor layer; readers treat values as point-in-time snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Approved,
    Rejected,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chain snapshot reported to callers. `NotStarted` means no execution
/// row exists yet for the (chain, tool call) pair: an explicit state,
/// distinct from a store failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    NotStarted,
    Pending,
    Approved,
    Rejected,
    Failed,
}

impl From<ExecutionStatus> for ChainStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Pending => Self::Pending,
            ExecutionStatus::Approved => Self::Approved,
            ExecutionStatus::Rejected => Self::Rejected,
            ExecutionStatus::Failed => Self::Failed,
        }
    }
}

/// Aggregate approval state of a tool call across all of its chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
    Failed,
}

// ─── Entities ─────────────────────────────────────────────────

/// Scope grouping a sequence of chat exchanges and their tool resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A tool registered for a run. Tool calls resolve against (run, name).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub run_id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One ingested exchange: the validated request/response payloads as sent,
/// plus the provider tag. Immutable after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub run_id: Uuid,
    pub provider: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A single conversation turn. `tool_calls` is `None` when the wire message
/// carried no tool calls at all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One invocation request embedded in a message, resolved to a registered
/// tool. `arguments` is the raw provider payload, kept opaque.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub name: String,
    pub arguments: String,
}

/// One candidate response for a completion call. `index` is copied verbatim
/// from the provider and preserves sibling order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    pub id: Uuid,
    pub index: u32,
    pub message: Message,
    pub finish_reason: FinishReason,
}

/// A named, ordered sequence of supervisors configured against a tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chain {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub name: String,
    pub supervisors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The materialized run of a chain against one tool call. At most one per
/// (chain, tool call) pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainExecution {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub tool_call_id: Uuid,
    pub status: ExecutionStatus,
    pub updated_at: DateTime<Utc>,
}

// ─── Aggregate views ──────────────────────────────────────────

/// One chain's snapshot within a `RunExecution`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainState {
    pub chain_id: Uuid,
    pub chain_name: String,
    /// `None` while the chain has not started against this tool call.
    pub execution_id: Option<Uuid>,
    pub status: ChainStatus,
}

/// Aggregate view of a tool call's approval state: the call itself, the
/// per-chain snapshots in chain creation order, and one aggregate status.
/// Derived on read, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunExecution {
    pub tool_call: ToolCall,
    pub chains: Vec<ChainState>,
    pub status: Status,
}

// ─── Ingestion id projection ──────────────────────────────────

/// Identifiers minted by one ingestion call — the caller's only handle to
/// the newly created records. Covers every choice and every tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIds {
    pub chat_id: Uuid,
    pub choice_ids: Vec<ChoiceIds>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceIds {
    pub choice_id: Uuid,
    pub message_id: Uuid,
    pub tool_call_ids: Vec<ToolCallIds>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallIds {
    pub tool_call_id: Uuid,
    pub tool_id: Uuid,
}
