//! Review events — pushed through the hub to every live subscriber.
//!
//! Best-effort delivery to observers: an event reaches every subscriber
//! registered at the moment of publish, in publish order, and is never
//! replayed for later arrivals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ExecutionStatus;

/// Events emitted by ingestion and supervisor decisions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewEvent {
    /// A chat exchange was ingested and persisted.
    ChatIngested { run_id: Uuid, chat_id: Uuid },
    /// A tool call was created and awaits chain approval.
    ToolCallPending {
        run_id: Uuid,
        tool_call_id: Uuid,
        tool_id: Uuid,
        name: String,
    },
    /// A supervisor decision changed a chain execution's state.
    ChainStateChanged {
        tool_call_id: Uuid,
        chain_id: Uuid,
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_a_type_tag() {
        let event = ReviewEvent::ChatIngested {
            run_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chat_ingested");
    }
}
