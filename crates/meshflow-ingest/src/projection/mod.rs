//! Per-kind projections of a received packet into node state and time series.
//!
//! Each ingest call runs exactly one projection, synchronously, after the
//! packet and its observation are committed. Projections see every
//! observation, so each one must tolerate being handed the same canonical
//! packet more than once.

mod node_info;
mod position;
mod telemetry;
mod text_message;

use anyhow::Result;
use chrono::{DateTime, Utc};

use meshflow_db::Database;
use meshflow_gateway::Publisher;
use meshflow_types::events::PacketReceived;
use meshflow_types::models::PacketBody;

pub struct Projector<'a> {
    pub db: &'a Database,
    pub publisher: &'a dyn Publisher,
    /// Server clock for this ingest call; stamped as `logged_time` on series rows
    pub now: DateTime<Utc>,
}

impl Projector<'_> {
    pub fn process(&self, event: &PacketReceived) -> Result<()> {
        match &event.packet.body {
            PacketBody::Message(message) => text_message::process(self, event, message),
            PacketBody::Position(position) => position::process(self, event, position),
            PacketBody::NodeInfo(info) => node_info::process(self, event, info),
            PacketBody::DeviceMetrics(metrics) => telemetry::device_metrics(self, event, metrics),
            PacketBody::LocalStats(stats) => telemetry::local_stats(self, event, stats),
            PacketBody::EnvironmentMetrics(env) => telemetry::environment(self, event, env),
        }
    }
}
