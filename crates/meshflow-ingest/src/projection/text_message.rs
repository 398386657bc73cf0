use anyhow::{Result, anyhow};
use tracing::{debug, error, info};
use uuid::Uuid;

use meshflow_types::events::{NodeSummary, PacketReceived, TextMessageView, ViewerEvent};
use meshflow_types::models::{MessagePayload, PacketKind, TextMessage};
use meshflow_types::node_id_to_hex;

use super::Projector;
use crate::claim::match_claim_key;

/// Record a chat message once per canonical packet, tell live viewers about it,
/// and treat direct messages as possible claim confirmations.
pub(super) fn process(projector: &Projector<'_>, event: &PacketReceived, payload: &MessagePayload) -> Result<()> {
    let packet = &event.packet;
    if projector.db.get_text_message_for_packet(packet.id)?.is_some() {
        debug!("Text message for packet {} already recorded", packet.id);
        return Ok(());
    }

    let message = TextMessage {
        id: Uuid::new_v4(),
        packet_ref: packet.id,
        sender_node_id: packet.header.from_int,
        recipient_node_id: packet.header.to_int,
        channel_id: event.observer.channel_for_slot(event.observation.meta.channel),
        sent_at: packet.first_observed_time,
        message_text: payload.text.clone(),
        is_emoji: payload.emoji,
        reply_to_message_id: payload.reply_packet_id,
    };

    // Another observer's ingest may have recorded it between the check and here
    if !projector.db.insert_text_message(&message)? {
        debug!("Text message for packet {} already recorded", packet.id);
        return Ok(());
    }
    info!(
        "Text message {} from {} on channel {:?}",
        message.id,
        node_id_to_hex(message.sender_node_id),
        message.channel_id
    );

    match publish(projector, &message) {
        Ok(viewers) => debug!("Text message {} sent to {} viewers", message.id, viewers),
        Err(e) => error!("Failed to publish text message {}: {}", message.id, e),
    }

    if packet.header.is_direct() {
        attempt_claim(projector, message.sender_node_id, &message.message_text)?;
    }
    Ok(())
}

fn publish(projector: &Projector<'_>, message: &TextMessage) -> Result<usize> {
    let sender = projector
        .db
        .get_observed_node(message.sender_node_id)?
        .ok_or_else(|| anyhow!("sender {} is not a known node", message.sender_node_id))?;
    let heard = projector.db.get_heard_by(PacketKind::Message, message.packet_ref)?;

    let view = TextMessageView {
        id: message.id,
        original_packet_id: message.packet_ref,
        sender: NodeSummary {
            node_id_str: sender.node_id_str,
            long_name: sender.long_name,
            short_name: sender.short_name,
        },
        recipient_node_id: message.recipient_node_id,
        channel: message.channel_id,
        sent_at: message.sent_at,
        message_text: message.message_text.clone(),
        is_emoji: message.is_emoji,
        reply_to_message_id: message.reply_to_message_id,
        heard,
    };
    projector.publisher.publish(&ViewerEvent::TextMessage(view))
}

/// Accept the oldest pending claim on the sender whose key this text spells out.
///
/// Text that isn't claim-key shaped never reaches the database.
fn attempt_claim(projector: &Projector<'_>, sender: i64, text: &str) -> Result<()> {
    let Some(key) = match_claim_key(text) else {
        return Ok(());
    };

    match projector.db.accept_claim(sender, &key, projector.now)? {
        Some(claim) => info!("Node {} claimed by user {}", node_id_to_hex(sender), claim.user_id),
        None => debug!("No pending claim on {} matches '{}'", node_id_to_hex(sender), key),
    }
    Ok(())
}
