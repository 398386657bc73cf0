use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node_id::BROADCAST_ID;

/// Number of channel slots a Meshtastic radio exposes.
pub const CHANNEL_SLOTS: usize = 8;

// -- Enumerations --

/// Where a position fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LocationSource {
    #[default]
    Unset,
    Manual,
    Internal,
    External,
}

impl LocationSource {
    const ALL: [Self; 4] = [Self::Unset, Self::Manual, Self::Internal, Self::External];

    pub fn code(self) -> i64 {
        match self {
            Self::Unset => 0,
            Self::Manual => 1,
            Self::Internal => 2,
            Self::External => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Manual => "LOC_MANUAL",
            Self::Internal => "LOC_INTERNAL",
            Self::External => "LOC_EXTERNAL",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Resolve a wire value. Absent, empty, and unknown values all become `Unset`;
    /// a numeric string is accepted when it names a known code.
    pub fn from_wire(value: Option<&str>) -> Self {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return Self::Unset;
        };
        if let Ok(code) = value.parse::<i64>() {
            return Self::from_code(code).unwrap_or_default();
        }
        Self::ALL
            .into_iter()
            .find(|s| s.label() == value)
            .unwrap_or_default()
    }
}

/// Device role a node advertises in its NodeInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    ClientMute,
    Router,
    RouterClient,
    Repeater,
    Tracker,
    Sensor,
    Tak,
    ClientHidden,
    LostAndFound,
    TakTracker,
    RouterLate,
}

impl Role {
    const ALL: [Self; 12] = [
        Self::Client,
        Self::ClientMute,
        Self::Router,
        Self::RouterClient,
        Self::Repeater,
        Self::Tracker,
        Self::Sensor,
        Self::Tak,
        Self::ClientHidden,
        Self::LostAndFound,
        Self::TakTracker,
        Self::RouterLate,
    ];

    pub fn code(self) -> i64 {
        match self {
            Self::Client => 0,
            Self::ClientMute => 1,
            Self::Router => 2,
            Self::RouterClient => 3,
            Self::Repeater => 4,
            Self::Tracker => 5,
            Self::Sensor => 6,
            Self::Tak => 7,
            Self::ClientHidden => 8,
            Self::LostAndFound => 9,
            Self::TakTracker => 10,
            Self::RouterLate => 11,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::ClientMute => "CLIENT_MUTE",
            Self::Router => "ROUTER",
            Self::RouterClient => "ROUTER_CLIENT",
            Self::Repeater => "REPEATER",
            Self::Tracker => "TRACKER",
            Self::Sensor => "SENSOR",
            Self::Tak => "TAK",
            Self::ClientHidden => "CLIENT_HIDDEN",
            Self::LostAndFound => "LOST_AND_FOUND",
            Self::TakTracker => "TAK_TRACKER",
            Self::RouterLate => "ROUTER_LATE",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Case-sensitive label lookup. Unknown labels leave the role unset.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.label() == label)
    }
}

// -- Packets --

/// Storage discriminator for the concrete packet tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Message,
    Position,
    NodeInfo,
    DeviceMetrics,
    LocalStats,
    EnvironmentMetrics,
}

impl PacketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Position => "position",
            Self::NodeInfo => "node_info",
            Self::DeviceMetrics => "device_metrics",
            Self::LocalStats => "local_stats",
            Self::EnvironmentMetrics => "environment_metrics",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(Self::Message),
            "position" => Some(Self::Position),
            "node_info" => Some(Self::NodeInfo),
            "device_metrics" => Some(Self::DeviceMetrics),
            "local_stats" => Some(Self::LocalStats),
            "environment_metrics" => Some(Self::EnvironmentMetrics),
            _ => None,
        }
    }
}

/// Fields every packet kind shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub packet_id: i64,
    pub from_int: i64,
    pub to_int: Option<i64>,
    pub port_num: String,
}

impl PacketHeader {
    /// True when the packet was addressed to one node rather than the whole channel.
    pub fn is_direct(&self) -> bool {
        self.to_int.is_some_and(|to| to != BROADCAST_ID)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    pub reply_packet_id: Option<i64>,
    pub emoji: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub location_source: LocationSource,
    pub precision_bits: Option<i64>,
    pub position_time: Option<DateTime<Utc>>,
    pub ground_speed: Option<f64>,
    pub ground_track: Option<f64>,
    pub sats_in_view: Option<i64>,
    pub pdop: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfoPayload {
    /// `user.id` as the radio reported it (`!xxxxxxxx`).
    pub node_id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub hw_model: Option<String>,
    pub sw_version: Option<String>,
    pub public_key: Option<String>,
    pub mac_address: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetricsPayload {
    pub reading_time: Option<DateTime<Utc>>,
    pub battery_level: Option<f64>,
    pub voltage: Option<f64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub uptime_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStatsPayload {
    pub reading_time: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<i64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub num_packets_tx: Option<i64>,
    pub num_packets_rx: Option<i64>,
    pub num_packets_rx_bad: Option<i64>,
    pub num_online_nodes: Option<i64>,
    pub num_total_nodes: Option<i64>,
    pub num_rx_dupe: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentMetricsPayload {
    pub reading_time: Option<DateTime<Utc>>,
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub barometric_pressure: Option<f64>,
    pub gas_resistance: Option<f64>,
    pub iaq: Option<f64>,
}

/// Kind-specific part of a canonical packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacketBody {
    Message(MessagePayload),
    Position(PositionPayload),
    NodeInfo(NodeInfoPayload),
    DeviceMetrics(DeviceMetricsPayload),
    LocalStats(LocalStatsPayload),
    EnvironmentMetrics(EnvironmentMetricsPayload),
}

impl PacketBody {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Message(_) => PacketKind::Message,
            Self::Position(_) => PacketKind::Position,
            Self::NodeInfo(_) => PacketKind::NodeInfo,
            Self::DeviceMetrics(_) => PacketKind::DeviceMetrics,
            Self::LocalStats(_) => PacketKind::LocalStats,
            Self::EnvironmentMetrics(_) => PacketKind::EnvironmentMetrics,
        }
    }

    /// Time the sender stamped on the reading itself, if any.
    pub fn reading_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Position(p) => p.position_time,
            Self::DeviceMetrics(m) => m.reading_time,
            Self::LocalStats(s) => s.reading_time,
            Self::EnvironmentMetrics(e) => e.reading_time,
            Self::Message(_) | Self::NodeInfo(_) => None,
        }
    }
}

/// The single stored row for one radio transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPacket {
    pub id: Uuid,
    pub header: PacketHeader,
    pub first_observed_time: DateTime<Utc>,
    pub body: PacketBody,
}

impl CanonicalPacket {
    pub fn kind(&self) -> PacketKind {
        self.body.kind()
    }

    pub fn effective_time(&self) -> DateTime<Utc> {
        self.body.reading_time().unwrap_or(self.first_observed_time)
    }
}

/// Per-reception radio metadata, as reported by one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationMeta {
    pub channel: Option<i64>,
    pub hop_limit: Option<i64>,
    pub hop_start: Option<i64>,
    pub rx_time: DateTime<Utc>,
    pub rx_rssi: Option<f64>,
    pub rx_snr: Option<f64>,
    pub relay_node: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketObservation {
    pub id: Uuid,
    pub packet_ref: Uuid,
    pub packet_kind: PacketKind,
    pub observer_id: Uuid,
    #[serde(flatten)]
    pub meta: ObservationMeta,
    pub upload_time: DateTime<Utc>,
}

// -- Nodes --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedNode {
    pub node_id: i64,
    pub node_id_str: String,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: Option<String>,
    pub sw_version: Option<String>,
    pub role: Option<Role>,
    pub mac_addr: Option<String>,
    pub public_key: Option<String>,
    pub last_heard: Option<DateTime<Utc>>,
    pub claimed_by: Option<Uuid>,
}

/// A gateway under a user's control, with its slot -> channel mapping loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedNode {
    pub id: Uuid,
    pub node_id: i64,
    pub name: String,
    pub owner_id: Uuid,
    pub channels: [Option<Uuid>; CHANNEL_SLOTS],
}

impl ManagedNode {
    /// Message channel mapped to a radio slot. Missing, out-of-range, and unmapped slots give `None`.
    pub fn channel_for_slot(&self, slot: Option<i64>) -> Option<Uuid> {
        let slot = usize::try_from(slot?).ok()?;
        self.channels.get(slot).copied().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOwnerClaim {
    pub id: Uuid,
    pub node_id: i64,
    pub user_id: Uuid,
    pub claim_key: String,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

// -- Projections --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub id: Uuid,
    pub packet_ref: Uuid,
    pub sender_node_id: i64,
    pub recipient_node_id: Option<i64>,
    pub channel_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    pub message_text: String,
    pub is_emoji: bool,
    pub reply_to_message_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    pub node_id: i64,
    pub packet_ref: Uuid,
    pub reported_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub location_source: LocationSource,
    pub precision_bits: Option<i64>,
    pub ground_speed: Option<f64>,
    pub ground_track: Option<f64>,
    pub sats_in_view: Option<i64>,
    pub pdop: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMetricsReport {
    pub node_id: i64,
    pub packet_ref: Uuid,
    pub reported_time: DateTime<Utc>,
    pub battery_level: f64,
    pub voltage: f64,
    pub channel_utilization: f64,
    pub air_util_tx: f64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalStatsReport {
    pub node_id: i64,
    pub packet_ref: Uuid,
    pub reported_time: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub channel_utilization: f64,
    pub air_util_tx: f64,
    pub num_packets_tx: i64,
    pub num_packets_rx: i64,
    pub num_packets_rx_bad: i64,
    pub num_online_nodes: i64,
    pub num_total_nodes: i64,
    pub num_rx_dupe: i64,
}

/// Sensor readings stay nullable: a missing sensor is not a zero reading.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentReport {
    pub node_id: i64,
    pub packet_ref: Uuid,
    pub reported_time: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub barometric_pressure: Option<f64>,
    pub gas_resistance: Option<f64>,
    pub iaq: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_source_wire_values() {
        assert_eq!(LocationSource::from_wire(None), LocationSource::Unset);
        assert_eq!(LocationSource::from_wire(Some("")), LocationSource::Unset);
        assert_eq!(LocationSource::from_wire(Some("LOC_INTERNAL")), LocationSource::Internal);
        assert_eq!(LocationSource::from_wire(Some("loc_internal")), LocationSource::Unset);
        assert_eq!(LocationSource::from_wire(Some("3")), LocationSource::External);
        assert_eq!(LocationSource::from_wire(Some("42")), LocationSource::Unset);
    }

    #[test]
    fn role_labels_are_case_sensitive() {
        assert_eq!(Role::from_label("ROUTER"), Some(Role::Router));
        assert_eq!(Role::from_label("router"), None);
        assert_eq!(Role::from_code(Role::TakTracker.code()), Some(Role::TakTracker));
    }

    #[test]
    fn channel_slots_resolve_only_in_range() {
        let general = Uuid::new_v4();
        let mut channels = [None; CHANNEL_SLOTS];
        channels[0] = Some(general);
        let node = ManagedNode {
            id: Uuid::new_v4(),
            node_id: 1,
            name: "gw".into(),
            owner_id: Uuid::new_v4(),
            channels,
        };

        assert_eq!(node.channel_for_slot(Some(0)), Some(general));
        assert_eq!(node.channel_for_slot(Some(1)), None);
        assert_eq!(node.channel_for_slot(Some(9)), None);
        assert_eq!(node.channel_for_slot(Some(-1)), None);
        assert_eq!(node.channel_for_slot(None), None);
    }

    #[test]
    fn broadcast_and_missing_recipient_are_not_direct() {
        let mut header = PacketHeader {
            packet_id: 1,
            from_int: 2,
            to_int: Some(BROADCAST_ID),
            port_num: "TEXT_MESSAGE_APP".into(),
        };
        assert!(!header.is_direct());
        header.to_int = None;
        assert!(!header.is_direct());
        header.to_int = Some(0x3ade68b1);
        assert!(header.is_direct());
    }
}
