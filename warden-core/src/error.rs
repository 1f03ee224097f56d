use thiserror::Error;
use uuid::Uuid;

/// What kind of entity a `NotFound` refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Run,
    Tool,
    ToolCall,
    Chain,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Tool => write!(f, "tool"),
            Self::ToolCall => write!(f, "tool call"),
            Self::Chain => write!(f, "chain"),
        }
    }
}

/// Failure taxonomy for ingestion and aggregation. Conversion and aggregation
/// are fail-fast: any step's error aborts the whole operation and no partial
/// result is returned.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Malformed base64/JSON/schema, or a violated caller contract.
    /// Client-correctable; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Uuid },

    /// A tool call names a tool that is not registered for the run. Fails the
    /// whole ingestion: a tool call without a resolvable tool is meaningless
    /// for later chain execution.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The store failed while reading or writing.
    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}
