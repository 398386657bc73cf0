use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use meshflow_types::models::{
    DeviceMetricsReport, EnvironmentReport, LocalStatsReport, LocationSource, PositionReport,
};

use crate::Database;
use crate::columns::{self, encode_time};

// Every series is keyed by its source packet (packet_ref UNIQUE), so a
// reading heard by several gateways is stored once.

impl Database {
    // -- Positions --

    pub fn insert_position(&self, report: &PositionReport, logged: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO positions (node_id, packet_ref, logged_time, reported_time, latitude, longitude,
                                        altitude, heading, location_source, precision_bits, ground_speed,
                                        ground_track, sats_in_view, pdop)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(packet_ref) DO NOTHING",
                params![
                    report.node_id,
                    report.packet_ref.to_string(),
                    encode_time(&logged),
                    encode_time(&report.reported_time),
                    report.latitude,
                    report.longitude,
                    report.altitude,
                    report.heading,
                    report.location_source.code(),
                    report.precision_bits,
                    report.ground_speed,
                    report.ground_track,
                    report.sats_in_view,
                    report.pdop,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_positions(&self, node_id: i64) -> Result<Vec<PositionReport>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id, packet_ref, reported_time, latitude, longitude, altitude, heading,
                        location_source, precision_bits, ground_speed, ground_track, sats_in_view, pdop
                 FROM positions WHERE node_id = ?1 ORDER BY reported_time",
            )?;
            let rows = stmt
                .query_map([node_id], |row| {
                    Ok(PositionReport {
                        node_id: row.get(0)?,
                        packet_ref: columns::uuid(row, 1)?,
                        reported_time: columns::time(row, 2)?,
                        latitude: row.get(3)?,
                        longitude: row.get(4)?,
                        altitude: row.get(5)?,
                        heading: row.get(6)?,
                        location_source: LocationSource::from_code(row.get(7)?).unwrap_or_default(),
                        precision_bits: row.get(8)?,
                        ground_speed: row.get(9)?,
                        ground_track: row.get(10)?,
                        sats_in_view: row.get(11)?,
                        pdop: row.get(12)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Device metrics --

    pub fn insert_device_metrics(&self, report: &DeviceMetricsReport, logged: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO device_metrics (node_id, packet_ref, logged_time, reported_time, battery_level,
                                             voltage, channel_utilization, air_util_tx, uptime_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(packet_ref) DO NOTHING",
                params![
                    report.node_id,
                    report.packet_ref.to_string(),
                    encode_time(&logged),
                    encode_time(&report.reported_time),
                    report.battery_level,
                    report.voltage,
                    report.channel_utilization,
                    report.air_util_tx,
                    report.uptime_seconds,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_device_metrics(&self, node_id: i64) -> Result<Vec<DeviceMetricsReport>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id, packet_ref, reported_time, battery_level, voltage, channel_utilization,
                        air_util_tx, uptime_seconds
                 FROM device_metrics WHERE node_id = ?1 ORDER BY reported_time",
            )?;
            let rows = stmt
                .query_map([node_id], |row| {
                    Ok(DeviceMetricsReport {
                        node_id: row.get(0)?,
                        packet_ref: columns::uuid(row, 1)?,
                        reported_time: columns::time(row, 2)?,
                        battery_level: row.get(3)?,
                        voltage: row.get(4)?,
                        channel_utilization: row.get(5)?,
                        air_util_tx: row.get(6)?,
                        uptime_seconds: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Local stats --

    pub fn insert_local_stats(&self, report: &LocalStatsReport, logged: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO local_stats (node_id, packet_ref, logged_time, reported_time, uptime_seconds,
                                          channel_utilization, air_util_tx, num_packets_tx, num_packets_rx,
                                          num_packets_rx_bad, num_online_nodes, num_total_nodes, num_rx_dupe)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(packet_ref) DO NOTHING",
                params![
                    report.node_id,
                    report.packet_ref.to_string(),
                    encode_time(&logged),
                    encode_time(&report.reported_time),
                    report.uptime_seconds,
                    report.channel_utilization,
                    report.air_util_tx,
                    report.num_packets_tx,
                    report.num_packets_rx,
                    report.num_packets_rx_bad,
                    report.num_online_nodes,
                    report.num_total_nodes,
                    report.num_rx_dupe,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_local_stats(&self, node_id: i64) -> Result<Vec<LocalStatsReport>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id, packet_ref, reported_time, uptime_seconds, channel_utilization, air_util_tx,
                        num_packets_tx, num_packets_rx, num_packets_rx_bad, num_online_nodes,
                        num_total_nodes, num_rx_dupe
                 FROM local_stats WHERE node_id = ?1 ORDER BY reported_time",
            )?;
            let rows = stmt
                .query_map([node_id], |row| {
                    Ok(LocalStatsReport {
                        node_id: row.get(0)?,
                        packet_ref: columns::uuid(row, 1)?,
                        reported_time: columns::time(row, 2)?,
                        uptime_seconds: row.get(3)?,
                        channel_utilization: row.get(4)?,
                        air_util_tx: row.get(5)?,
                        num_packets_tx: row.get(6)?,
                        num_packets_rx: row.get(7)?,
                        num_packets_rx_bad: row.get(8)?,
                        num_online_nodes: row.get(9)?,
                        num_total_nodes: row.get(10)?,
                        num_rx_dupe: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Environment metrics --

    pub fn insert_environment_metrics(&self, report: &EnvironmentReport, logged: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO environment_metrics (node_id, packet_ref, logged_time, reported_time, temperature,
                                                  relative_humidity, barometric_pressure, gas_resistance, iaq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(packet_ref) DO NOTHING",
                params![
                    report.node_id,
                    report.packet_ref.to_string(),
                    encode_time(&logged),
                    encode_time(&report.reported_time),
                    report.temperature,
                    report.relative_humidity,
                    report.barometric_pressure,
                    report.gas_resistance,
                    report.iaq,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_environment_metrics(&self, node_id: i64) -> Result<Vec<EnvironmentReport>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id, packet_ref, reported_time, temperature, relative_humidity,
                        barometric_pressure, gas_resistance, iaq
                 FROM environment_metrics WHERE node_id = ?1 ORDER BY reported_time",
            )?;
            let rows = stmt
                .query_map([node_id], |row| {
                    Ok(EnvironmentReport {
                        node_id: row.get(0)?,
                        packet_ref: columns::uuid(row, 1)?,
                        reported_time: columns::time(row, 2)?,
                        temperature: row.get(3)?,
                        relative_humidity: row.get(4)?,
                        barometric_pressure: row.get(5)?,
                        gas_resistance: row.get(6)?,
                        iaq: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures::at;
    use uuid::Uuid;

    #[test]
    fn one_reading_per_packet() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_observed_node(3).unwrap();
        let report = DeviceMetricsReport {
            node_id: 3,
            packet_ref: Uuid::new_v4(),
            reported_time: at(100),
            battery_level: 87.0,
            voltage: 4.1,
            channel_utilization: 3.5,
            air_util_tx: 0.4,
            uptime_seconds: 3600,
        };

        assert!(db.insert_device_metrics(&report, at(101)).unwrap());
        assert!(!db.insert_device_metrics(&report, at(102)).unwrap());
        assert_eq!(db.get_device_metrics(3).unwrap(), vec![report]);
    }
}
