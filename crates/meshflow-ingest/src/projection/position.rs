use anyhow::Result;
use tracing::debug;

use meshflow_types::events::PacketReceived;
use meshflow_types::models::{PositionPayload, PositionReport};

use super::Projector;

pub(super) fn process(projector: &Projector<'_>, event: &PacketReceived, position: &PositionPayload) -> Result<()> {
    let report = PositionReport {
        node_id: event.packet.header.from_int,
        packet_ref: event.packet.id,
        reported_time: event.packet.effective_time(),
        latitude: position.latitude,
        longitude: position.longitude,
        altitude: position.altitude,
        heading: position.heading,
        location_source: position.location_source,
        precision_bits: position.precision_bits,
        ground_speed: position.ground_speed,
        ground_track: position.ground_track,
        sats_in_view: position.sats_in_view,
        pdop: position.pdop,
    };

    if !projector.db.insert_position(&report, projector.now)? {
        debug!("Position for packet {} already recorded", event.packet.id);
    }
    Ok(())
}
