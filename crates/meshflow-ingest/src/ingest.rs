use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use meshflow_db::Database;
use meshflow_gateway::Publisher;
use meshflow_types::events::PacketReceived;
use meshflow_types::models::ManagedNode;
use meshflow_types::node_id_to_hex;

use crate::error::IngestError;
use crate::normalize::{NormalizedPacket, normalize};
use crate::projection::Projector;

/// Result of one accepted upload.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub event: PacketReceived,
    pub warnings: Vec<String>,
}

/// Entry point for gateway uploads: normalize, dedup, record, project.
#[derive(Clone)]
pub struct IngestService {
    db: Arc<Database>,
    publisher: Arc<dyn Publisher>,
}

impl IngestService {
    pub fn new(db: Arc<Database>, publisher: Arc<dyn Publisher>) -> Self {
        Self { db, publisher }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn ingest(&self, observer: &ManagedNode, payload: &Value) -> Result<IngestOutcome, IngestError> {
        self.ingest_at(observer, payload, Utc::now())
    }

    /// Like [`ingest`](Self::ingest) with an explicit server clock.
    ///
    /// A packet already stored for (kind, packet_id) is left untouched; the
    /// call still appends this observer's observation and runs the projection.
    pub fn ingest_at(
        &self,
        observer: &ManagedNode,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        let NormalizedPacket {
            header,
            body,
            meta,
            warnings,
        } = normalize(payload)?;
        for warning in &warnings {
            warn!("Gateway {}: {}", observer.name, warning);
        }

        let recorded = self.db.record_packet(&header, &body, &meta, observer.id, now)?;
        let packet = &recorded.packet;
        if recorded.created {
            info!(
                "{} packet {} from {} heard by {}",
                packet.kind().as_str(),
                packet.header.packet_id,
                node_id_to_hex(packet.header.from_int),
                observer.name
            );
        } else {
            debug!(
                "Duplicate {} packet {} heard by {}",
                packet.kind().as_str(),
                packet.header.packet_id,
                observer.name
            );
        }

        self.db
            .advance_last_heard(packet.header.from_int, packet.effective_time())?;

        let event = PacketReceived {
            packet: recorded.packet,
            observer: observer.clone(),
            observation: recorded.observation,
            created: recorded.created,
        };

        let projector = Projector {
            db: &self.db,
            publisher: self.publisher.as_ref(),
            now,
        };
        projector.process(&event)?;

        Ok(IngestOutcome { event, warnings })
    }
}
