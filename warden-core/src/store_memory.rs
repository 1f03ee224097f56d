//! In-memory `Store` — the reference backend for tests and single-process
//! deployments. All state lives behind one `RwLock`; a `create_chat` call is
//! atomic with respect to every reader.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::Store;
use crate::types::*;

#[derive(Default)]
struct Tables {
    runs: HashMap<Uuid, Run>,
    tools: HashMap<Uuid, Tool>,
    chats: HashMap<Uuid, Chat>,
    /// Messages per run, in insertion order.
    run_messages: HashMap<Uuid, Vec<Message>>,
    tool_calls: HashMap<Uuid, ToolCall>,
    chains: HashMap<Uuid, Chain>,
    /// Chain ids per tool, in creation order.
    tool_chains: HashMap<Uuid, Vec<Uuid>>,
    /// Executions keyed by (chain, tool call).
    executions: HashMap<(Uuid, Uuid), ChainExecution>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn index_tool_calls(tables: &mut Tables, message: &Message) {
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            tables.tool_calls.insert(call.id, call.clone());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_run(&self) -> Result<Run> {
        let run = Run {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        self.tables.write().await.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.tables.read().await.runs.get(&id).cloned())
    }

    async fn create_tool(&self, run_id: Uuid, name: &str, description: &str) -> Result<Tool> {
        let tool = Tool {
            id: Uuid::new_v4(),
            run_id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        let mut tables = self.tables.write().await;
        if tables
            .tools
            .values()
            .any(|t| t.run_id == run_id && t.name == name)
        {
            anyhow::bail!("tool {name:?} already registered for run {run_id}");
        }
        tables.tools.insert(tool.id, tool.clone());
        Ok(tool)
    }

    async fn get_tool(&self, id: Uuid) -> Result<Option<Tool>> {
        Ok(self.tables.read().await.tools.get(&id).cloned())
    }

    async fn get_tool_by_name(&self, run_id: Uuid, name: &str) -> Result<Option<Tool>> {
        Ok(self
            .tables
            .read()
            .await
            .tools
            .values()
            .find(|t| t.run_id == run_id && t.name == name)
            .cloned())
    }

    async fn create_chat(
        &self,
        run_id: Uuid,
        provider: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
        choices: &[Choice],
        new_messages: &[Message],
    ) -> Result<Uuid> {
        let chat = Chat {
            id: Uuid::new_v4(),
            run_id,
            provider: provider.to_string(),
            request: request.clone(),
            response: response.clone(),
            created_at: Utc::now(),
        };
        let chat_id = chat.id;

        let mut tables = self.tables.write().await;
        tables.chats.insert(chat_id, chat);

        for message in new_messages {
            index_tool_calls(&mut tables, message);
            tables
                .run_messages
                .entry(run_id)
                .or_default()
                .push(message.clone());
        }

        // Every choice's tool calls become reviewable; only the first
        // choice's message joins the run history (the picked choice — later
        // requests replay it as the assistant turn).
        for (position, choice) in choices.iter().enumerate() {
            index_tool_calls(&mut tables, &choice.message);
            if position == 0 {
                tables
                    .run_messages
                    .entry(run_id)
                    .or_default()
                    .push(choice.message.clone());
            }
        }

        Ok(chat_id)
    }

    async fn messages_for_run(&self, run_id: Uuid) -> Result<Vec<Message>> {
        Ok(self
            .tables
            .read()
            .await
            .run_messages
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_tool_call(&self, id: Uuid) -> Result<Option<ToolCall>> {
        Ok(self.tables.read().await.tool_calls.get(&id).cloned())
    }

    async fn create_chain(
        &self,
        tool_id: Uuid,
        name: &str,
        supervisors: &[String],
    ) -> Result<Chain> {
        let chain = Chain {
            id: Uuid::new_v4(),
            tool_id,
            name: name.to_string(),
            supervisors: supervisors.to_vec(),
            created_at: Utc::now(),
        };
        let mut tables = self.tables.write().await;
        tables.chains.insert(chain.id, chain.clone());
        tables.tool_chains.entry(tool_id).or_default().push(chain.id);
        Ok(chain)
    }

    async fn get_chain(&self, id: Uuid) -> Result<Option<Chain>> {
        Ok(self.tables.read().await.chains.get(&id).cloned())
    }

    async fn chains_for_tool(&self, tool_id: Uuid) -> Result<Vec<Chain>> {
        let tables = self.tables.read().await;
        let ids = tables.tool_chains.get(&tool_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| tables.chains.get(id).cloned())
            .collect())
    }

    async fn get_chain_execution(
        &self,
        chain_id: Uuid,
        tool_call_id: Uuid,
    ) -> Result<Option<Uuid>> {
        Ok(self
            .tables
            .read()
            .await
            .executions
            .get(&(chain_id, tool_call_id))
            .map(|execution| execution.id))
    }

    async fn get_chain_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionStatus>> {
        Ok(self
            .tables
            .read()
            .await
            .executions
            .values()
            .find(|execution| execution.id == execution_id)
            .map(|execution| execution.status))
    }

    async fn record_chain_decision(
        &self,
        chain_id: Uuid,
        tool_call_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<ChainExecution> {
        let mut tables = self.tables.write().await;
        let execution = tables
            .executions
            .entry((chain_id, tool_call_id))
            .or_insert_with(|| ChainExecution {
                id: Uuid::new_v4(),
                chain_id,
                tool_call_id,
                status,
                updated_at: Utc::now(),
            });
        execution.status = status;
        execution.updated_at = Utc::now();
        Ok(execution.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tool_names_are_unique_per_run() {
        let store = MemoryStore::new();
        let run = store.create_run().await.unwrap();
        store.create_tool(run.id, "shell", "run a command").await.unwrap();
        assert!(store.create_tool(run.id, "shell", "again").await.is_err());

        let other = store.create_run().await.unwrap();
        assert!(store.create_tool(other.id, "shell", "ok elsewhere").await.is_ok());
    }

    #[tokio::test]
    async fn chains_enumerate_in_creation_order() {
        let store = MemoryStore::new();
        let run = store.create_run().await.unwrap();
        let tool = store.create_tool(run.id, "shell", "").await.unwrap();
        let first = store.create_chain(tool.id, "safety", &[]).await.unwrap();
        let second = store.create_chain(tool.id, "budget", &[]).await.unwrap();
        let third = store.create_chain(tool.id, "human", &[]).await.unwrap();

        let chains = store.chains_for_tool(tool.id).await.unwrap();
        let ids: Vec<Uuid> = chains.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[tokio::test]
    async fn decision_creates_then_updates_one_execution() {
        let store = MemoryStore::new();
        let chain_id = Uuid::new_v4();
        let tool_call_id = Uuid::new_v4();

        let created = store
            .record_chain_decision(chain_id, tool_call_id, ExecutionStatus::Pending)
            .await
            .unwrap();
        let updated = store
            .record_chain_decision(chain_id, tool_call_id, ExecutionStatus::Approved)
            .await
            .unwrap();

        assert_eq!(created.id, updated.id);
        assert_eq!(
            store.get_chain_execution(chain_id, tool_call_id).await.unwrap(),
            Some(created.id)
        );
        assert_eq!(
            store.get_chain_execution_status(created.id).await.unwrap(),
            Some(ExecutionStatus::Approved)
        );
    }
}
