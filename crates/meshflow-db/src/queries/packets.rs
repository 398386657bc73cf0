use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use meshflow_types::events::{HeardBy, ObserverSummary};
use meshflow_types::models::{
    CanonicalPacket, DeviceMetricsPayload, EnvironmentMetricsPayload, LocalStatsPayload,
    LocationSource, MessagePayload, NodeInfoPayload, ObservationMeta, PacketBody, PacketHeader,
    PacketKind, PacketObservation, PositionPayload, Role,
};
use meshflow_types::node_id_to_hex;

use super::OptionalExt;
use crate::Database;
use crate::columns::{self, encode_opt_time, encode_time};
use crate::models::RecordedPacket;

const HEADER_COLUMNS: &str = "id, packet_id, from_int, to_int, port_num, first_observed_time";

const OBSERVATION_COLUMNS: &str = "id, packet_kind, packet_ref, observer_id, channel, hop_limit, hop_start, \
     rx_time, rx_rssi, rx_snr, relay_node, upload_time";

impl Database {
    // -- Canonical packets --

    /// Get-or-create the canonical packet for (kind, packet_id) and append one observation.
    ///
    /// An existing packet row is never modified; the returned packet is whatever
    /// the first ingest stored. The sending node is registered as an observed
    /// node in the same transaction.
    pub fn record_packet(
        &self,
        header: &PacketHeader,
        body: &PacketBody,
        meta: &ObservationMeta,
        observer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RecordedPacket> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let created = insert_packet_if_absent(&tx, Uuid::new_v4(), header, body, &now)?;
            let packet = query_packet(&tx, body.kind(), header.packet_id)?.ok_or_else(|| {
                anyhow!(
                    "{} packet {} missing after insert",
                    body.kind().as_str(),
                    header.packet_id
                )
            })?;

            super::nodes::ensure_observed_node(&tx, header.from_int)?;
            let observation = insert_observation(&tx, &packet, observer_id, meta, now)?;

            tx.commit()?;
            Ok(RecordedPacket {
                packet,
                observation,
                created,
            })
        })
    }

    pub fn get_packet(&self, kind: PacketKind, packet_id: i64) -> Result<Option<CanonicalPacket>> {
        self.with_conn(|conn| query_packet(conn, kind, packet_id))
    }

    pub fn count_packets(&self, kind: PacketKind) -> Result<i64> {
        self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM {}", table_for(kind));
            Ok(conn.query_row(&sql, [], |row| row.get(0))?)
        })
    }

    // -- Observations --

    pub fn get_observations(&self, kind: PacketKind, packet_ref: Uuid) -> Result<Vec<PacketObservation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM packet_observations
                 WHERE packet_kind = ?1 AND packet_ref = ?2
                 ORDER BY upload_time"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![kind.as_str(), packet_ref.to_string()], observation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Gateways that heard a packet, joined with their names (single query, no N+1).
    pub fn get_heard_by(&self, kind: PacketKind, packet_ref: Uuid) -> Result<Vec<HeardBy>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.node_id, m.name, o.rx_time, o.rx_rssi, o.rx_snr, o.hop_limit, o.hop_start, o.channel
                 FROM packet_observations o
                 JOIN managed_nodes m ON m.id = o.observer_id
                 WHERE o.packet_kind = ?1 AND o.packet_ref = ?2
                 ORDER BY o.upload_time",
            )?;

            let rows = stmt
                .query_map(params![kind.as_str(), packet_ref.to_string()], |row| {
                    Ok(HeardBy {
                        observer: ObserverSummary {
                            node_id_str: node_id_to_hex(row.get(0)?),
                            name: row.get(1)?,
                        },
                        rx_time: columns::time(row, 2)?,
                        rx_rssi: row.get(3)?,
                        rx_snr: row.get(4)?,
                        hop_limit: row.get(5)?,
                        hop_start: row.get(6)?,
                        channel: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn table_for(kind: PacketKind) -> &'static str {
    match kind {
        PacketKind::Message => "message_packets",
        PacketKind::Position => "position_packets",
        PacketKind::NodeInfo => "node_info_packets",
        PacketKind::DeviceMetrics => "device_metrics_packets",
        PacketKind::LocalStats => "local_stats_packets",
        PacketKind::EnvironmentMetrics => "environment_metrics_packets",
    }
}

/// Kind-specific columns, in the order `body_from_row` reads them (from index 6).
fn body_columns(kind: PacketKind) -> &'static str {
    match kind {
        PacketKind::Message => "message_text, reply_packet_id, emoji",
        PacketKind::Position => {
            "latitude, longitude, altitude, heading, location_source, precision_bits, position_time, \
             ground_speed, ground_track, sats_in_view, pdop"
        }
        PacketKind::NodeInfo => {
            "node_id, short_name, long_name, hw_model, sw_version, public_key, mac_address, role"
        }
        PacketKind::DeviceMetrics => {
            "reading_time, battery_level, voltage, channel_utilization, air_util_tx, uptime_seconds"
        }
        PacketKind::LocalStats => {
            "reading_time, uptime_seconds, channel_utilization, air_util_tx, num_packets_tx, \
             num_packets_rx, num_packets_rx_bad, num_online_nodes, num_total_nodes, num_rx_dupe"
        }
        PacketKind::EnvironmentMetrics => {
            "reading_time, temperature, relative_humidity, barometric_pressure, gas_resistance, iaq"
        }
    }
}

/// Returns true when a new row was written, false when (kind, packet_id) already existed.
fn insert_packet_if_absent(
    conn: &Connection,
    id: Uuid,
    header: &PacketHeader,
    body: &PacketBody,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let sql = format!(
        "INSERT INTO {table} ({HEADER_COLUMNS}, {columns}) VALUES ({placeholders})
         ON CONFLICT(packet_id) DO NOTHING",
        table = table_for(body.kind()),
        columns = body_columns(body.kind()),
        placeholders = placeholders(6 + body_columns(body.kind()).split(',').count()),
    );

    let id = id.to_string();
    let first_observed = encode_time(now);
    let h = header;

    let changed = match body {
        PacketBody::Message(m) => conn.execute(
            &sql,
            params![
                id, h.packet_id, h.from_int, h.to_int, h.port_num, first_observed,
                m.text, m.reply_packet_id, m.emoji
            ],
        )?,
        PacketBody::Position(p) => conn.execute(
            &sql,
            params![
                id, h.packet_id, h.from_int, h.to_int, h.port_num, first_observed,
                p.latitude, p.longitude, p.altitude, p.heading, p.location_source.code(),
                p.precision_bits, encode_opt_time(p.position_time.as_ref()), p.ground_speed,
                p.ground_track, p.sats_in_view, p.pdop
            ],
        )?,
        PacketBody::NodeInfo(n) => conn.execute(
            &sql,
            params![
                id, h.packet_id, h.from_int, h.to_int, h.port_num, first_observed,
                n.node_id, n.short_name, n.long_name, n.hw_model, n.sw_version, n.public_key,
                n.mac_address, n.role.map(Role::code)
            ],
        )?,
        PacketBody::DeviceMetrics(d) => conn.execute(
            &sql,
            params![
                id, h.packet_id, h.from_int, h.to_int, h.port_num, first_observed,
                encode_opt_time(d.reading_time.as_ref()), d.battery_level, d.voltage,
                d.channel_utilization, d.air_util_tx, d.uptime_seconds
            ],
        )?,
        PacketBody::LocalStats(s) => conn.execute(
            &sql,
            params![
                id, h.packet_id, h.from_int, h.to_int, h.port_num, first_observed,
                encode_opt_time(s.reading_time.as_ref()), s.uptime_seconds, s.channel_utilization,
                s.air_util_tx, s.num_packets_tx, s.num_packets_rx, s.num_packets_rx_bad,
                s.num_online_nodes, s.num_total_nodes, s.num_rx_dupe
            ],
        )?,
        PacketBody::EnvironmentMetrics(e) => conn.execute(
            &sql,
            params![
                id, h.packet_id, h.from_int, h.to_int, h.port_num, first_observed,
                encode_opt_time(e.reading_time.as_ref()), e.temperature, e.relative_humidity,
                e.barometric_pressure, e.gas_resistance, e.iaq
            ],
        )?,
    };

    Ok(changed == 1)
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_packet(conn: &Connection, kind: PacketKind, packet_id: i64) -> Result<Option<CanonicalPacket>> {
    let sql = format!(
        "SELECT {HEADER_COLUMNS}, {columns} FROM {table} WHERE packet_id = ?1",
        columns = body_columns(kind),
        table = table_for(kind),
    );
    let mut stmt = conn.prepare(&sql)?;

    let packet = stmt
        .query_row([packet_id], |row| {
            Ok(CanonicalPacket {
                id: columns::uuid(row, 0)?,
                header: PacketHeader {
                    packet_id: row.get(1)?,
                    from_int: row.get(2)?,
                    to_int: row.get(3)?,
                    port_num: row.get(4)?,
                },
                first_observed_time: columns::time(row, 5)?,
                body: body_from_row(kind, row)?,
            })
        })
        .optional()?;

    Ok(packet)
}

fn body_from_row(kind: PacketKind, row: &Row<'_>) -> rusqlite::Result<PacketBody> {
    let body = match kind {
        PacketKind::Message => PacketBody::Message(MessagePayload {
            text: row.get(6)?,
            reply_packet_id: row.get(7)?,
            emoji: row.get(8)?,
        }),
        PacketKind::Position => PacketBody::Position(PositionPayload {
            latitude: row.get(6)?,
            longitude: row.get(7)?,
            altitude: row.get(8)?,
            heading: row.get(9)?,
            location_source: LocationSource::from_code(row.get(10)?).unwrap_or_default(),
            precision_bits: row.get(11)?,
            position_time: columns::opt_time(row, 12)?,
            ground_speed: row.get(13)?,
            ground_track: row.get(14)?,
            sats_in_view: row.get(15)?,
            pdop: row.get(16)?,
        }),
        PacketKind::NodeInfo => PacketBody::NodeInfo(NodeInfoPayload {
            node_id: row.get(6)?,
            short_name: row.get(7)?,
            long_name: row.get(8)?,
            hw_model: row.get(9)?,
            sw_version: row.get(10)?,
            public_key: row.get(11)?,
            mac_address: row.get(12)?,
            role: row.get::<_, Option<i64>>(13)?.and_then(Role::from_code),
        }),
        PacketKind::DeviceMetrics => PacketBody::DeviceMetrics(DeviceMetricsPayload {
            reading_time: columns::opt_time(row, 6)?,
            battery_level: row.get(7)?,
            voltage: row.get(8)?,
            channel_utilization: row.get(9)?,
            air_util_tx: row.get(10)?,
            uptime_seconds: row.get(11)?,
        }),
        PacketKind::LocalStats => PacketBody::LocalStats(LocalStatsPayload {
            reading_time: columns::opt_time(row, 6)?,
            uptime_seconds: row.get(7)?,
            channel_utilization: row.get(8)?,
            air_util_tx: row.get(9)?,
            num_packets_tx: row.get(10)?,
            num_packets_rx: row.get(11)?,
            num_packets_rx_bad: row.get(12)?,
            num_online_nodes: row.get(13)?,
            num_total_nodes: row.get(14)?,
            num_rx_dupe: row.get(15)?,
        }),
        PacketKind::EnvironmentMetrics => PacketBody::EnvironmentMetrics(EnvironmentMetricsPayload {
            reading_time: columns::opt_time(row, 6)?,
            temperature: row.get(7)?,
            relative_humidity: row.get(8)?,
            barometric_pressure: row.get(9)?,
            gas_resistance: row.get(10)?,
            iaq: row.get(11)?,
        }),
    };
    Ok(body)
}

fn insert_observation(
    conn: &Connection,
    packet: &CanonicalPacket,
    observer_id: Uuid,
    meta: &ObservationMeta,
    now: DateTime<Utc>,
) -> Result<PacketObservation> {
    let observation = PacketObservation {
        id: Uuid::new_v4(),
        packet_ref: packet.id,
        packet_kind: packet.kind(),
        observer_id,
        meta: meta.clone(),
        upload_time: now,
    };

    conn.execute(
        &format!("INSERT INTO packet_observations ({OBSERVATION_COLUMNS}) VALUES ({})", placeholders(12)),
        params![
            observation.id.to_string(),
            observation.packet_kind.as_str(),
            observation.packet_ref.to_string(),
            observation.observer_id.to_string(),
            meta.channel,
            meta.hop_limit,
            meta.hop_start,
            encode_time(&meta.rx_time),
            meta.rx_rssi,
            meta.rx_snr,
            meta.relay_node,
            encode_time(&observation.upload_time),
        ],
    )?;

    Ok(observation)
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<PacketObservation> {
    let kind: String = row.get(1)?;
    let packet_kind = PacketKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown packet kind '{}'", kind).into(),
        )
    })?;

    Ok(PacketObservation {
        id: columns::uuid(row, 0)?,
        packet_kind,
        packet_ref: columns::uuid(row, 2)?,
        observer_id: columns::uuid(row, 3)?,
        meta: ObservationMeta {
            channel: row.get(4)?,
            hop_limit: row.get(5)?,
            hop_start: row.get(6)?,
            rx_time: columns::time(row, 7)?,
            rx_rssi: row.get(8)?,
            rx_snr: row.get(9)?,
            relay_node: row.get(10)?,
        },
        upload_time: columns::time(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures::{at, gateway, header, meta, text};

    #[test]
    fn duplicate_reports_share_one_packet() {
        let db = Database::open_in_memory().unwrap();
        let observers: Vec<_> = (1..=3).map(|n| gateway(&db, 0x1000 + n)).collect();

        for (i, observer) in observers.iter().enumerate() {
            let t = at(1_700_000_000 + i as i64 * 5);
            let recorded = db
                .record_packet(&header(42, 0x3ade68b1, None), &text("hello mesh"), &meta(t), observer.id, t)
                .unwrap();
            assert_eq!(recorded.created, i == 0);
            assert_eq!(recorded.packet.first_observed_time, at(1_700_000_000));
        }

        assert_eq!(db.count_packets(PacketKind::Message).unwrap(), 1);
        let packet = db.get_packet(PacketKind::Message, 42).unwrap().unwrap();
        let observations = db.get_observations(PacketKind::Message, packet.id).unwrap();
        assert_eq!(observations.len(), 3);
        assert!(observations.iter().all(|o| o.packet_ref == packet.id));
    }

    #[test]
    fn later_duplicates_do_not_rewrite_fields() {
        let db = Database::open_in_memory().unwrap();
        let a = gateway(&db, 1);
        let b = gateway(&db, 2);

        db.record_packet(&header(7, 99, Some(5)), &text("first"), &meta(at(10)), a.id, at(10))
            .unwrap();
        let second = db
            .record_packet(&header(7, 99, Some(6)), &text("second"), &meta(at(20)), b.id, at(20))
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.packet.header.to_int, Some(5));
        assert_eq!(second.packet.body, text("first"));
        assert_eq!(second.observation.upload_time, at(20));
    }

    #[test]
    fn same_packet_id_in_different_kinds_is_distinct() {
        let db = Database::open_in_memory().unwrap();
        let gw = gateway(&db, 1);
        let stats = PacketBody::EnvironmentMetrics(EnvironmentMetricsPayload {
            reading_time: Some(at(50)),
            temperature: Some(21.5),
            relative_humidity: None,
            barometric_pressure: None,
            gas_resistance: None,
            iaq: None,
        });

        let msg = db.record_packet(&header(9, 3, None), &text("x"), &meta(at(1)), gw.id, at(1)).unwrap();
        let env = db.record_packet(&header(9, 3, None), &stats, &meta(at(1)), gw.id, at(1)).unwrap();

        assert!(msg.created && env.created);
        assert_ne!(msg.packet.id, env.packet.id);
        assert_eq!(env.packet.effective_time(), at(50));
    }

    #[test]
    fn heard_by_lists_each_gateway() {
        let db = Database::open_in_memory().unwrap();
        let a = gateway(&db, 0x10);
        let b = gateway(&db, 0x20);

        let first = db.record_packet(&header(1, 2, None), &text("x"), &meta(at(1)), a.id, at(1)).unwrap();
        db.record_packet(&header(1, 2, None), &text("x"), &meta(at(2)), b.id, at(2)).unwrap();

        let heard = db.get_heard_by(PacketKind::Message, first.packet.id).unwrap();
        let names: Vec<_> = heard.iter().map(|h| h.observer.name.as_str()).collect();
        assert_eq!(names, vec!["gw-16", "gw-32"]);
        assert_eq!(heard[0].observer.node_id_str, "!00000010");
    }

    #[test]
    fn sender_becomes_observed_node() {
        let db = Database::open_in_memory().unwrap();
        let gw = gateway(&db, 1);
        db.record_packet(&header(1, 0x3ade68b1, None), &text("x"), &meta(at(1)), gw.id, at(1))
            .unwrap();

        let node = db.get_observed_node(0x3ade68b1).unwrap().unwrap();
        assert_eq!(node.node_id_str, "!3ade68b1");
        assert_eq!(node.short_name, "68b1");
        assert_eq!(node.last_heard, None);
    }
}
