mod claims;
mod keys;
mod messages;
mod nodes;
mod packets;
mod telemetry;

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> anyhow::Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> anyhow::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use meshflow_types::models::{
        ManagedNode, MessagePayload, ObservationMeta, PacketBody, PacketHeader,
    };
    use uuid::Uuid;

    use crate::Database;

    pub fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    pub fn user(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), username).unwrap();
        id
    }

    pub fn gateway(db: &Database, node_id: i64) -> ManagedNode {
        let owner = user(db, &format!("owner-{node_id}"));
        db.create_managed_node(node_id, &format!("gw-{node_id}"), owner).unwrap()
    }

    pub fn header(packet_id: i64, from_int: i64, to_int: Option<i64>) -> PacketHeader {
        PacketHeader {
            packet_id,
            from_int,
            to_int,
            port_num: "TEXT_MESSAGE_APP".into(),
        }
    }

    pub fn text(body: &str) -> PacketBody {
        PacketBody::Message(MessagePayload {
            text: body.into(),
            reply_packet_id: None,
            emoji: false,
        })
    }

    pub fn meta(rx_time: DateTime<Utc>) -> ObservationMeta {
        ObservationMeta {
            channel: Some(0),
            hop_limit: Some(3),
            hop_start: Some(3),
            rx_time,
            rx_rssi: Some(-90.0),
            rx_snr: Some(6.25),
            relay_node: None,
        }
    }
}
