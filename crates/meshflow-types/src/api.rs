use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::NodeOwnerClaim;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the viewer WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Ingest --

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// -- Claims --

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub node: String,
    pub user: Uuid,
    pub claim_key: String,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl From<NodeOwnerClaim> for ClaimResponse {
    fn from(claim: NodeOwnerClaim) -> Self {
        Self {
            node: crate::node_id_to_hex(claim.node_id),
            user: claim.user_id,
            claim_key: claim.claim_key,
            created_at: claim.created_at,
            accepted_at: claim.accepted_at,
        }
    }
}
