//! Wire JSON -> canonical packet.
//!
//! Gateways upload the Meshtastic JSON envelope more or less as the radio
//! produced it: camelCase keys, kind-specific data nested under `decoded`,
//! Unix-second timestamps, enum labels as strings. Everything here is pure;
//! nothing touches storage until a packet has fully normalized.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use meshflow_types::hex_to_node_id;
use meshflow_types::models::{
    DeviceMetricsPayload, EnvironmentMetricsPayload, LocalStatsPayload, LocationSource,
    MessagePayload, NodeInfoPayload, ObservationMeta, PacketBody, PacketHeader, PositionPayload,
    Role,
};

use crate::error::IngestError;

pub const TEXT_MESSAGE_APP: &str = "TEXT_MESSAGE_APP";
pub const POSITION_APP: &str = "POSITION_APP";
pub const NODEINFO_APP: &str = "NODEINFO_APP";
pub const TELEMETRY_APP: &str = "TELEMETRY_APP";

/// A payload that passed validation, ready to be stored.
#[derive(Debug, Clone)]
pub struct NormalizedPacket {
    pub header: PacketHeader,
    pub body: PacketBody,
    pub meta: ObservationMeta,
    /// Non-fatal notes for the uploader (e.g. hex node ids)
    pub warnings: Vec<String>,
}

/// Node ids arrive as integers from current firmware and as `!xxxxxxxx` from older bridges.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireNodeId {
    Signed(i64),
    Unsigned(u64),
    Text(String),
}

/// Enum fields are usually labels but some bridges send the numeric code.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireLabel {
    Code(i64),
    Text(String),
}

/// Meshtastic's `emoji` is a fixed32 where non-zero means "this is a reaction".
#[derive(Deserialize)]
#[serde(untagged)]
enum WireFlag {
    Bool(bool),
    Int(i64),
}

impl WireFlag {
    fn is_set(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
        }
    }
}

/// Normalize one uploaded packet.
///
/// Validation errors name the offending field using the wire path
/// (`rxTime`, `decoded.portnum`, `decoded.telemetry`, ...).
pub fn normalize(payload: &Value) -> Result<NormalizedPacket, IngestError> {
    let mut reader = WireReader {
        payload,
        warnings: Vec::new(),
    };

    let port_num: String = reader.required("decoded.portnum")?;
    let header = PacketHeader {
        packet_id: reader.required("id")?,
        from_int: reader
            .node_id("from")?
            .ok_or_else(|| IngestError::invalid("from", "This field is required."))?,
        to_int: reader.node_id("to")?,
        port_num: port_num.clone(),
    };

    let rx_time = reader
        .timestamp("rxTime")?
        .ok_or_else(|| IngestError::invalid("rxTime", "This field is required."))?;
    let meta = ObservationMeta {
        channel: reader.optional("channel")?,
        hop_limit: reader.optional("hopLimit")?,
        hop_start: reader.optional("hopStart")?,
        rx_time,
        rx_rssi: reader.optional("rxRssi")?,
        rx_snr: reader.optional("rxSnr")?,
        relay_node: reader.optional("relayNode")?,
    };

    let body = match port_num.as_str() {
        TEXT_MESSAGE_APP => PacketBody::Message(reader.message()?),
        POSITION_APP => PacketBody::Position(reader.position()?),
        NODEINFO_APP => PacketBody::NodeInfo(reader.node_info()?),
        TELEMETRY_APP => reader.telemetry()?,
        other => {
            return Err(IngestError::invalid(
                "decoded.portnum",
                format!("Unknown packet type: {}", other),
            ));
        }
    };

    Ok(NormalizedPacket {
        header,
        body,
        meta,
        warnings: reader.warnings,
    })
}

struct WireReader<'a> {
    payload: &'a Value,
    warnings: Vec<String>,
}

impl<'a> WireReader<'a> {
    /// Walk a dotted path. Explicit `null` counts as absent.
    fn lookup(&self, path: &str) -> Option<&'a Value> {
        path.split('.')
            .try_fold(self.payload, |value, key| value.get(key))
            .filter(|value| !value.is_null())
    }

    fn has(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    fn optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, IngestError> {
        self.lookup(path)
            .map(|value| T::deserialize(value).map_err(|e| IngestError::invalid(path, e.to_string())))
            .transpose()
    }

    fn required<T: DeserializeOwned>(&self, path: &str) -> Result<T, IngestError> {
        self.optional(path)?
            .ok_or_else(|| IngestError::invalid(path, "This field is required."))
    }

    fn node_id(&mut self, path: &str) -> Result<Option<i64>, IngestError> {
        let Some(wire) = self.optional::<WireNodeId>(path)? else {
            return Ok(None);
        };

        match wire {
            WireNodeId::Signed(id) => Ok(Some(id)),
            WireNodeId::Unsigned(id) => i64::try_from(id)
                .map(Some)
                .map_err(|_| IngestError::invalid(path, format!("Node id {} is out of range", id))),
            WireNodeId::Text(text) => {
                let id = hex_to_node_id(&text).ok_or_else(|| {
                    IngestError::invalid(path, format!("'{}' is not a node id", text))
                })?;
                self.warnings.push(format!(
                    "{}: hex node id '{}' accepted, integer form is preferred",
                    path, text
                ));
                Ok(Some(id))
            }
        }
    }

    fn timestamp(&self, path: &str) -> Result<Option<DateTime<Utc>>, IngestError> {
        let Some(secs) = self.optional::<i64>(path)? else {
            return Ok(None);
        };
        DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or_else(|| IngestError::invalid(path, format!("Invalid timestamp: {}", secs)))
    }

    fn label(&self, path: &str) -> Result<Option<WireLabel>, IngestError> {
        self.optional(path)
    }

    // -- Kinds --

    fn message(&self) -> Result<MessagePayload, IngestError> {
        Ok(MessagePayload {
            text: self.required("decoded.text")?,
            reply_packet_id: self.optional("decoded.replyId")?,
            emoji: self
                .optional::<WireFlag>("decoded.emoji")?
                .is_some_and(|flag| flag.is_set()),
        })
    }

    fn position(&self) -> Result<PositionPayload, IngestError> {
        let location_source = match self.label("decoded.position.locationSource")? {
            Some(WireLabel::Code(code)) => LocationSource::from_code(code).unwrap_or_default(),
            Some(WireLabel::Text(label)) => LocationSource::from_wire(Some(&label)),
            None => LocationSource::Unset,
        };

        Ok(PositionPayload {
            latitude: self.required("decoded.position.latitude")?,
            longitude: self.required("decoded.position.longitude")?,
            altitude: self.optional("decoded.position.altitude")?,
            heading: self.optional("decoded.position.heading")?,
            location_source,
            precision_bits: self.optional("decoded.position.precisionBits")?,
            position_time: self.timestamp("decoded.position.time")?,
            ground_speed: self.optional("decoded.position.groundSpeed")?,
            ground_track: self.optional("decoded.position.groundTrack")?,
            sats_in_view: self.optional("decoded.position.satsInView")?,
            pdop: self.optional("decoded.position.PDOP")?,
        })
    }

    fn node_info(&self) -> Result<NodeInfoPayload, IngestError> {
        let role = match self.label("decoded.user.role")? {
            Some(WireLabel::Code(code)) => Role::from_code(code),
            Some(WireLabel::Text(label)) => Role::from_label(&label),
            None => None,
        };

        Ok(NodeInfoPayload {
            node_id: self.required("decoded.user.id")?,
            short_name: self.optional("decoded.user.shortName")?,
            long_name: self.optional("decoded.user.longName")?,
            hw_model: self.optional("decoded.user.hwModel")?,
            sw_version: self.optional("decoded.user.swVersion")?,
            public_key: self.optional("decoded.user.publicKey")?,
            mac_address: self.optional("decoded.user.macaddr")?,
            role,
        })
    }

    /// One telemetry envelope carries exactly one of the metric groups.
    fn telemetry(&self) -> Result<PacketBody, IngestError> {
        let present: Vec<&str> = ["deviceMetrics", "localStats", "environmentMetrics"]
            .into_iter()
            .filter(|group| self.has(&format!("decoded.telemetry.{}", group)))
            .collect();

        let reading_time = self.timestamp("decoded.telemetry.time")?;
        match present.as_slice() {
            ["deviceMetrics"] => {
                let base = "decoded.telemetry.deviceMetrics";
                Ok(PacketBody::DeviceMetrics(DeviceMetricsPayload {
                    reading_time,
                    battery_level: self.optional(&format!("{base}.batteryLevel"))?,
                    voltage: self.optional(&format!("{base}.voltage"))?,
                    channel_utilization: self.optional(&format!("{base}.channelUtilization"))?,
                    air_util_tx: self.optional(&format!("{base}.airUtilTx"))?,
                    uptime_seconds: self.optional(&format!("{base}.uptimeSeconds"))?,
                }))
            }
            ["localStats"] => {
                let base = "decoded.telemetry.localStats";
                Ok(PacketBody::LocalStats(LocalStatsPayload {
                    reading_time,
                    uptime_seconds: self.optional(&format!("{base}.uptimeSeconds"))?,
                    channel_utilization: self.optional(&format!("{base}.channelUtilization"))?,
                    air_util_tx: self.optional(&format!("{base}.airUtilTx"))?,
                    num_packets_tx: self.optional(&format!("{base}.numPacketsTx"))?,
                    num_packets_rx: self.optional(&format!("{base}.numPacketsRx"))?,
                    num_packets_rx_bad: self.optional(&format!("{base}.numPacketsRxBad"))?,
                    num_online_nodes: self.optional(&format!("{base}.numOnlineNodes"))?,
                    num_total_nodes: self.optional(&format!("{base}.numTotalNodes"))?,
                    num_rx_dupe: self.optional(&format!("{base}.numRxDupe"))?,
                }))
            }
            ["environmentMetrics"] => {
                let base = "decoded.telemetry.environmentMetrics";
                Ok(PacketBody::EnvironmentMetrics(EnvironmentMetricsPayload {
                    reading_time,
                    temperature: self.optional(&format!("{base}.temperature"))?,
                    relative_humidity: self.optional(&format!("{base}.relativeHumidity"))?,
                    barometric_pressure: self.optional(&format!("{base}.barometricPressure"))?,
                    gas_resistance: self.optional(&format!("{base}.gasResistance"))?,
                    iaq: self.optional(&format!("{base}.iaq"))?,
                }))
            }
            _ => Err(IngestError::invalid(
                "decoded.telemetry",
                "Must contain exactly one of deviceMetrics, localStats or environmentMetrics",
            )),
        }
    }
}
