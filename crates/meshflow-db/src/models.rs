/// Database row types and results that have no counterpart in meshflow-types.
use meshflow_types::models::{CanonicalPacket, ManagedNode, PacketObservation, Role};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub created_at: String,
}

/// Outcome of one get-or-create + observation write.
#[derive(Debug, Clone)]
pub struct RecordedPacket {
    /// The surviving canonical row, exactly as first stored.
    pub packet: CanonicalPacket,
    pub observation: PacketObservation,
    /// False on a dedup hit.
    pub created: bool,
}

/// Result of resolving an ingest API key to its observer.
#[derive(Debug)]
pub enum ApiKeyLookup {
    /// No active key with that value
    Unknown,
    /// Key is valid but not linked to any managed node
    Unlinked,
    /// Key is linked to more than one managed node
    Ambiguous,
    Observer(ManagedNode),
}

/// Mutable identity fields a NodeInfo packet carries.
#[derive(Debug, Clone, Default)]
pub struct NodeIdentity {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub hw_model: Option<String>,
    pub sw_version: Option<String>,
    pub role: Option<Role>,
}
