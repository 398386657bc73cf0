use anyhow::Result;
use tracing::debug;

use meshflow_types::events::PacketReceived;
use meshflow_types::models::{
    DeviceMetricsPayload, DeviceMetricsReport, EnvironmentMetricsPayload, EnvironmentReport,
    LocalStatsPayload, LocalStatsReport,
};

use super::Projector;

// Device counters default to zero when the radio leaves them out.
// Environment readings stay null: an absent sensor is not a zero reading.

pub(super) fn device_metrics(
    projector: &Projector<'_>,
    event: &PacketReceived,
    metrics: &DeviceMetricsPayload,
) -> Result<()> {
    let report = DeviceMetricsReport {
        node_id: event.packet.header.from_int,
        packet_ref: event.packet.id,
        reported_time: event.packet.effective_time(),
        battery_level: metrics.battery_level.unwrap_or(0.0),
        voltage: metrics.voltage.unwrap_or(0.0),
        channel_utilization: metrics.channel_utilization.unwrap_or(0.0),
        air_util_tx: metrics.air_util_tx.unwrap_or(0.0),
        uptime_seconds: metrics.uptime_seconds.unwrap_or(0),
    };

    if !projector.db.insert_device_metrics(&report, projector.now)? {
        debug!("Device metrics for packet {} already recorded", event.packet.id);
    }
    Ok(())
}

pub(super) fn local_stats(projector: &Projector<'_>, event: &PacketReceived, stats: &LocalStatsPayload) -> Result<()> {
    let report = LocalStatsReport {
        node_id: event.packet.header.from_int,
        packet_ref: event.packet.id,
        reported_time: event.packet.effective_time(),
        uptime_seconds: stats.uptime_seconds.unwrap_or(0),
        channel_utilization: stats.channel_utilization.unwrap_or(0.0),
        air_util_tx: stats.air_util_tx.unwrap_or(0.0),
        num_packets_tx: stats.num_packets_tx.unwrap_or(0),
        num_packets_rx: stats.num_packets_rx.unwrap_or(0),
        num_packets_rx_bad: stats.num_packets_rx_bad.unwrap_or(0),
        num_online_nodes: stats.num_online_nodes.unwrap_or(0),
        num_total_nodes: stats.num_total_nodes.unwrap_or(0),
        num_rx_dupe: stats.num_rx_dupe.unwrap_or(0),
    };

    if !projector.db.insert_local_stats(&report, projector.now)? {
        debug!("Local stats for packet {} already recorded", event.packet.id);
    }
    Ok(())
}

pub(super) fn environment(
    projector: &Projector<'_>,
    event: &PacketReceived,
    env: &EnvironmentMetricsPayload,
) -> Result<()> {
    let report = EnvironmentReport {
        node_id: event.packet.header.from_int,
        packet_ref: event.packet.id,
        reported_time: event.packet.effective_time(),
        temperature: env.temperature,
        relative_humidity: env.relative_humidity,
        barometric_pressure: env.barometric_pressure,
        gas_resistance: env.gas_resistance,
        iaq: env.iaq,
    };

    if !projector.db.insert_environment_metrics(&report, projector.now)? {
        debug!("Environment metrics for packet {} already recorded", event.packet.id);
    }
    Ok(())
}
