//! warden-core — ingestion, status aggregation and event fan-out for the
//! tool-call supervision server.
//!
//! The pipeline turns externally-formatted chat exchanges into the internal
//! entity graph; the aggregator folds per-chain execution snapshots into one
//! approval status per tool call; the hub broadcasts review events to live
//! subscribers. All persistence goes through the pluggable [`Store`] trait.

pub mod convert;
pub mod error;
pub mod events;
pub mod hub;
pub mod openai;
pub mod status;
pub mod store;
pub mod store_memory;
pub mod types;

pub use convert::ChatPipeline;
pub use error::{EntityKind, ReviewError};
pub use events::ReviewEvent;
pub use hub::Hub;
pub use status::{aggregate_status, StatusAggregator};
pub use store::Store;
pub use store_memory::MemoryStore;
