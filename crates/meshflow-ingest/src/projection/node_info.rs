use anyhow::Result;
use tracing::debug;

use meshflow_db::models::NodeIdentity;
use meshflow_types::events::PacketReceived;
use meshflow_types::{hex_to_node_id, node_id_to_hex};
use meshflow_types::models::NodeInfoPayload;

use super::Projector;

/// Apply the advertised identity to the sending node.
///
/// Every NodeInfo packet overwrites identity, including copies where the
/// advertised `user.id` differs from the sender; those are only logged.
/// Public key and MAC address stay on the packet row.
pub(super) fn process(projector: &Projector<'_>, event: &PacketReceived, info: &NodeInfoPayload) -> Result<()> {
    let sender = event.packet.header.from_int;
    if hex_to_node_id(&info.node_id) != Some(sender) {
        debug!(
            "NodeInfo from {} advertises user id {}; applying to sender",
            node_id_to_hex(sender),
            info.node_id
        );
    }

    let identity = NodeIdentity {
        short_name: info.short_name.clone(),
        long_name: info.long_name.clone(),
        hw_model: info.hw_model.clone(),
        sw_version: info.sw_version.clone(),
        role: info.role,
    };
    projector.db.update_node_identity(sender, &identity)?;
    Ok(())
}
