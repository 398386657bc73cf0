use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CanonicalPacket, ManagedNode, PacketKind, PacketObservation};

/// Raised once per successful ingest call, after the packet and observation are committed.
///
/// Owned and serializable so it can be handed to a queue later without changing
/// what projections receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketReceived {
    pub packet: CanonicalPacket,
    pub observer: ManagedNode,
    pub observation: PacketObservation,
    /// False when the canonical packet already existed (dedup hit).
    pub created: bool,
}

impl PacketReceived {
    pub fn kind(&self) -> PacketKind {
        self.packet.kind()
    }
}

/// Events published to live viewer connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ViewerEvent {
    /// A chat message heard on the mesh for the first time
    TextMessage(TextMessageView),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessageView {
    pub id: Uuid,
    pub original_packet_id: Uuid,
    pub sender: NodeSummary,
    pub recipient_node_id: Option<i64>,
    pub channel: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    pub message_text: String,
    pub is_emoji: bool,
    pub reply_to_message_id: Option<i64>,
    pub heard: Vec<HeardBy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id_str: String,
    pub long_name: String,
    pub short_name: String,
}

/// One gateway's reception of the message's packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeardBy {
    pub observer: ObserverSummary,
    pub rx_time: DateTime<Utc>,
    pub rx_rssi: Option<f64>,
    pub rx_snr: Option<f64>,
    pub hop_limit: Option<i64>,
    pub hop_start: Option<i64>,
    pub channel: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverSummary {
    pub node_id_str: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_event_is_tagged() {
        let event = ViewerEvent::TextMessage(TextMessageView {
            id: Uuid::nil(),
            original_packet_id: Uuid::nil(),
            sender: NodeSummary {
                node_id_str: "!3ade68b1".into(),
                long_name: "Base".into(),
                short_name: "BS".into(),
            },
            recipient_node_id: None,
            channel: None,
            sent_at: DateTime::from_timestamp(1_672_531_200, 0).unwrap_or_default(),
            message_text: "hi".into(),
            is_emoji: false,
            reply_to_message_id: None,
            heard: vec![],
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text_message");
        assert_eq!(json["data"]["sender"]["node_id_str"], "!3ade68b1");
        assert_eq!(json["data"]["message_text"], "hi");
    }
}
