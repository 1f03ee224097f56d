use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence trait for all supervision state.
///
/// The pipeline and the aggregator operate exclusively through this trait,
/// enabling pluggable backends (MemoryStore for tests and single-process
/// runs, Postgres for production). Implementations must be safe for
/// concurrent use and provide read-after-write consistency within a run.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Runs ──

    async fn create_run(&self) -> Result<Run>;
    async fn get_run(&self, id: Uuid) -> Result<Option<Run>>;

    // ── Tools ──

    async fn create_tool(&self, run_id: Uuid, name: &str, description: &str) -> Result<Tool>;
    async fn get_tool(&self, id: Uuid) -> Result<Option<Tool>>;
    /// Resolve a tool by name within a run. Tool-call resolution is scoped
    /// to the run; names are unique per run.
    async fn get_tool_by_name(&self, run_id: Uuid, name: &str) -> Result<Option<Tool>>;

    // ── Chats and messages ──

    /// Persist one ingested exchange as a single logical write: the chat
    /// row, its choices, and the newly introduced request messages. Returns
    /// the chat id. Durability of the whole set is the implementation's
    /// concern; callers never retry.
    async fn create_chat(
        &self,
        run_id: Uuid,
        provider: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
        choices: &[Choice],
        new_messages: &[Message],
    ) -> Result<Uuid>;

    /// Messages logged against the run so far, in insertion order. The
    /// pipeline's prefix-cut filter counts these.
    async fn messages_for_run(&self, run_id: Uuid) -> Result<Vec<Message>>;

    // ── Tool calls ──

    async fn get_tool_call(&self, id: Uuid) -> Result<Option<ToolCall>>;

    // ── Chains ──

    async fn create_chain(&self, tool_id: Uuid, name: &str, supervisors: &[String])
        -> Result<Chain>;
    async fn get_chain(&self, id: Uuid) -> Result<Option<Chain>>;
    /// Chains configured for a tool, in creation order. The aggregator's
    /// result ordering leans on this being stable across calls.
    async fn chains_for_tool(&self, tool_id: Uuid) -> Result<Vec<Chain>>;

    // ── Chain executions ──

    /// The execution id keyed by (chain, tool call), if one has started.
    /// `None` is "not started", not a failure.
    async fn get_chain_execution(
        &self,
        chain_id: Uuid,
        tool_call_id: Uuid,
    ) -> Result<Option<Uuid>>;

    /// Point-in-time status snapshot of an execution.
    async fn get_chain_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionStatus>>;

    /// Record a supervisor decision: create the (chain, tool call) execution
    /// if absent, then set its status. Returns the execution after the
    /// write.
    async fn record_chain_decision(
        &self,
        chain_id: Uuid,
        tool_call_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<ChainExecution>;
}
