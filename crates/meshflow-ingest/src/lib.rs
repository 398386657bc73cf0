//! Packet ingest pipeline: wire normalization, dedup through the packet store,
//! and the per-kind projections that run synchronously after each ingest.

pub mod claim;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod projection;

pub use error::IngestError;
pub use ingest::{IngestOutcome, IngestService};
