//! Chain-execution status aggregation.
//!
//! Given a tool call, enumerates the chains configured for its tool, reads
//! each chain's execution snapshot, and folds them into one aggregate
//! status. The result is a snapshot, not a transaction: no lock is held
//! across the reads, so concurrent supervisor decisions may interleave with
//! the per-chain lookups. What is guaranteed is that the aggregate status is
//! computed purely from the per-chain states returned in the same response.

use std::sync::Arc;

use anyhow::anyhow;
use uuid::Uuid;

use crate::error::{EntityKind, ReviewError};
use crate::store::Store;
use crate::types::*;

/// Computes aggregate approval state for tool calls.
pub struct StatusAggregator {
    store: Arc<dyn Store>,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve the tool call, collect one snapshot per configured chain (in
    /// chain creation order, so repeated queries are directly comparable),
    /// and aggregate. A chain with no execution yet reports `NotStarted`;
    /// an execution with no retrievable state is a store gap and fails the
    /// read.
    pub async fn tool_call_state(&self, tool_call_id: Uuid) -> Result<RunExecution, ReviewError> {
        let tool_call = self
            .store
            .get_tool_call(tool_call_id)
            .await?
            .ok_or(ReviewError::NotFound {
                kind: EntityKind::ToolCall,
                id: tool_call_id,
            })?;

        let chains = self.store.chains_for_tool(tool_call.tool_id).await?;

        let mut states = Vec::with_capacity(chains.len());
        for chain in chains {
            let state = match self
                .store
                .get_chain_execution(chain.id, tool_call_id)
                .await?
            {
                Some(execution_id) => {
                    let status = self
                        .store
                        .get_chain_execution_status(execution_id)
                        .await?
                        .ok_or_else(|| {
                            ReviewError::Store(anyhow!(
                                "chain execution {execution_id} has no recorded state"
                            ))
                        })?;
                    ChainState {
                        chain_id: chain.id,
                        chain_name: chain.name,
                        execution_id: Some(execution_id),
                        status: status.into(),
                    }
                }
                None => ChainState {
                    chain_id: chain.id,
                    chain_name: chain.name,
                    execution_id: None,
                    status: ChainStatus::NotStarted,
                },
            };
            states.push(state);
        }

        let status = aggregate_status(&states);

        Ok(RunExecution {
            tool_call,
            chains: states,
            status,
        })
    }
}

/// Fold per-chain snapshots into one aggregate status. Pure (no store
/// reads), so the aggregate is always consistent with the list it was
/// computed from. Precedence: any rejection wins, then failure, then
/// anything still outstanding; a tool with no chains configured has nothing
/// supervising it and aggregates to `Approved`.
pub fn aggregate_status(chains: &[ChainState]) -> Status {
    let mut failed = false;
    let mut outstanding = false;
    for chain in chains {
        match chain.status {
            ChainStatus::Rejected => return Status::Rejected,
            ChainStatus::Failed => failed = true,
            ChainStatus::Pending | ChainStatus::NotStarted => outstanding = true,
            ChainStatus::Approved => {}
        }
    }
    if failed {
        Status::Failed
    } else if outstanding {
        Status::Pending
    } else {
        Status::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;

    fn state(status: ChainStatus) -> ChainState {
        ChainState {
            chain_id: Uuid::new_v4(),
            chain_name: "chain".to_string(),
            execution_id: None,
            status,
        }
    }

    #[test]
    fn aggregation_precedence() {
        use ChainStatus::*;

        assert_eq!(aggregate_status(&[]), Status::Approved);
        assert_eq!(aggregate_status(&[state(Approved)]), Status::Approved);
        assert_eq!(
            aggregate_status(&[state(Approved), state(NotStarted)]),
            Status::Pending
        );
        assert_eq!(
            aggregate_status(&[state(Approved), state(Pending)]),
            Status::Pending
        );
        assert_eq!(
            aggregate_status(&[state(Pending), state(Failed)]),
            Status::Failed
        );
        assert_eq!(
            aggregate_status(&[state(Failed), state(Pending), state(Rejected)]),
            Status::Rejected
        );
    }

    async fn seeded_tool_call(store: &Arc<MemoryStore>) -> (Uuid, Uuid) {
        let run = store.create_run().await.unwrap();
        let tool = store.create_tool(run.id, "shell", "").await.unwrap();

        let tool_call = ToolCall {
            id: Uuid::new_v4(),
            tool_id: tool.id,
            name: "shell".to_string(),
            arguments: "{}".to_string(),
        };
        let message = Message {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            kind: MessageKind::Text,
            content: String::new(),
            tool_calls: Some(vec![tool_call.clone()]),
        };
        store
            .create_chat(
                run.id,
                "openai",
                &serde_json::json!({}),
                &serde_json::json!({}),
                &[],
                &[message],
            )
            .await
            .unwrap();

        (tool.id, tool_call.id)
    }

    #[tokio::test]
    async fn missing_tool_call_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = StatusAggregator::new(store);
        let err = aggregator.tool_call_state(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::NotFound {
                kind: EntityKind::ToolCall,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unexecuted_chains_report_not_started() {
        let store = Arc::new(MemoryStore::new());
        let (tool_id, tool_call_id) = seeded_tool_call(&store).await;
        store.create_chain(tool_id, "safety", &[]).await.unwrap();
        store.create_chain(tool_id, "human", &[]).await.unwrap();

        let aggregator = StatusAggregator::new(store);
        let execution = aggregator.tool_call_state(tool_call_id).await.unwrap();

        assert_eq!(execution.chains.len(), 2);
        assert!(execution
            .chains
            .iter()
            .all(|c| c.status == ChainStatus::NotStarted && c.execution_id.is_none()));
        assert_eq!(execution.status, Status::Pending);
    }

    #[tokio::test]
    async fn chain_order_is_stable_across_queries() {
        let store = Arc::new(MemoryStore::new());
        let (tool_id, tool_call_id) = seeded_tool_call(&store).await;
        for name in ["first", "second", "third", "fourth"] {
            store.create_chain(tool_id, name, &[]).await.unwrap();
        }

        let aggregator = StatusAggregator::new(store);
        let a = aggregator.tool_call_state(tool_call_id).await.unwrap();
        let b = aggregator.tool_call_state(tool_call_id).await.unwrap();

        let order_a: Vec<Uuid> = a.chains.iter().map(|c| c.chain_id).collect();
        let order_b: Vec<Uuid> = b.chains.iter().map(|c| c.chain_id).collect();
        assert_eq!(order_a, order_b);
        assert_eq!(
            a.chains.iter().map(|c| c.chain_name.as_str()).collect::<Vec<_>>(),
            vec!["first", "second", "third", "fourth"]
        );
    }

    #[tokio::test]
    async fn decisions_flow_into_the_aggregate() {
        let store = Arc::new(MemoryStore::new());
        let (tool_id, tool_call_id) = seeded_tool_call(&store).await;
        let safety = store.create_chain(tool_id, "safety", &[]).await.unwrap();
        let human = store.create_chain(tool_id, "human", &[]).await.unwrap();

        let aggregator = StatusAggregator::new(store.clone());

        store
            .record_chain_decision(safety.id, tool_call_id, ExecutionStatus::Approved)
            .await
            .unwrap();
        let execution = aggregator.tool_call_state(tool_call_id).await.unwrap();
        assert_eq!(execution.chains[0].status, ChainStatus::Approved);
        assert_eq!(execution.chains[1].status, ChainStatus::NotStarted);
        assert_eq!(execution.status, Status::Pending);

        store
            .record_chain_decision(human.id, tool_call_id, ExecutionStatus::Approved)
            .await
            .unwrap();
        let execution = aggregator.tool_call_state(tool_call_id).await.unwrap();
        assert_eq!(execution.status, Status::Approved);

        store
            .record_chain_decision(human.id, tool_call_id, ExecutionStatus::Rejected)
            .await
            .unwrap();
        let execution = aggregator.tool_call_state(tool_call_id).await.unwrap();
        assert_eq!(execution.status, Status::Rejected);
    }
}
