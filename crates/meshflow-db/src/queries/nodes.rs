use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use meshflow_types::models::{CHANNEL_SLOTS, ManagedNode, ObservedNode, Role};
use meshflow_types::node_id_to_hex;

use super::OptionalExt;
use crate::Database;
use crate::columns::{self, encode_time};
use crate::models::{NodeIdentity, UserRow};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)",
                (id, username),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, created_at FROM users WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(UserRow {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Observed nodes --

    /// Register a node the first time it is heard. Returns true if it was new.
    pub fn ensure_observed_node(&self, node_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| ensure_observed_node(conn, node_id))
    }

    pub fn get_observed_node(&self, node_id: i64) -> Result<Option<ObservedNode>> {
        self.with_conn(|conn| {
            let node = conn
                .query_row(
                    "SELECT node_id, node_id_str, long_name, short_name, hw_model, sw_version, role,
                            mac_addr, public_key, last_heard, claimed_by
                     FROM observed_nodes WHERE node_id = ?1",
                    [node_id],
                    |row| {
                        Ok(ObservedNode {
                            node_id: row.get(0)?,
                            node_id_str: row.get(1)?,
                            long_name: row.get(2)?,
                            short_name: row.get(3)?,
                            hw_model: row.get(4)?,
                            sw_version: row.get(5)?,
                            role: row.get::<_, Option<i64>>(6)?.and_then(Role::from_code),
                            mac_addr: row.get(7)?,
                            public_key: row.get(8)?,
                            last_heard: columns::opt_time(row, 9)?,
                            claimed_by: columns::opt_uuid(row, 10)?,
                        })
                    },
                )
                .optional()?;
            Ok(node)
        })
    }

    /// Move `last_heard` to `heard_at` unless it is already at or past it.
    /// Returns true when the stored value changed.
    pub fn advance_last_heard(&self, node_id: i64, heard_at: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE observed_nodes SET last_heard = ?2
                 WHERE node_id = ?1 AND (last_heard IS NULL OR last_heard < ?2)",
                params![node_id, encode_time(&heard_at)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Overwrite identity fields from a NodeInfo packet. Names keep their
    /// previous value when the packet omits them.
    pub fn update_node_identity(&self, node_id: i64, identity: &NodeIdentity) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE observed_nodes SET
                    short_name = COALESCE(?2, short_name),
                    long_name  = COALESCE(?3, long_name),
                    hw_model   = ?4,
                    sw_version = ?5,
                    role       = ?6
                 WHERE node_id = ?1",
                params![
                    node_id,
                    identity.short_name,
                    identity.long_name,
                    identity.hw_model,
                    identity.sw_version,
                    identity.role.map(Role::code),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Managed nodes --

    pub fn create_message_channel(&self, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO message_channels (id, name) VALUES (?1, ?2)",
                (id.to_string(), name),
            )?;
            Ok(id)
        })
    }

    pub fn create_managed_node(&self, node_id: i64, name: &str, owner_id: Uuid) -> Result<ManagedNode> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO managed_nodes (id, node_id, name, owner_id) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), node_id, name, owner_id.to_string()],
            )?;
            Ok(ManagedNode {
                id,
                node_id,
                name: name.to_string(),
                owner_id,
                channels: [None; CHANNEL_SLOTS],
            })
        })
    }

    /// Map a radio channel slot (0-7) on a gateway to a message channel.
    pub fn set_channel_slot(&self, managed_node_id: Uuid, slot: usize, channel_id: Uuid) -> Result<()> {
        if slot >= CHANNEL_SLOTS {
            return Err(anyhow!("channel slot {} out of range", slot));
        }
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO managed_node_channels (managed_node_id, slot, channel_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(managed_node_id, slot) DO UPDATE SET channel_id = excluded.channel_id",
                params![managed_node_id.to_string(), slot as i64, channel_id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn get_managed_node(&self, id: Uuid) -> Result<Option<ManagedNode>> {
        self.with_conn(|conn| query_managed_node(conn, id))
    }
}

/// Default identity mirrors what a fresh Meshtastic radio advertises.
pub(super) fn ensure_observed_node(conn: &Connection, node_id: i64) -> Result<bool> {
    let hex = node_id_to_hex(node_id);
    let suffix = hex[hex.len().saturating_sub(4)..].to_string();

    let changed = conn.execute(
        "INSERT INTO observed_nodes (node_id, node_id_str, long_name, short_name) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(node_id) DO NOTHING",
        params![node_id, hex, format!("Meshtastic {}", suffix), suffix],
    )?;
    Ok(changed == 1)
}

pub(super) fn query_managed_node(conn: &Connection, id: Uuid) -> Result<Option<ManagedNode>> {
    let Some((node_id, name, owner_id)) = conn
        .query_row(
            "SELECT node_id, name, owner_id FROM managed_nodes WHERE id = ?1",
            [id.to_string()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, columns::uuid(row, 2)?)),
        )
        .optional()?
    else {
        return Ok(None);
    };

    let mut channels = [None; CHANNEL_SLOTS];
    let mut stmt = conn.prepare(
        "SELECT slot, channel_id FROM managed_node_channels WHERE managed_node_id = ?1",
    )?;
    let slots = stmt
        .query_map([id.to_string()], |row| Ok((row.get::<_, i64>(0)?, columns::uuid(row, 1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (slot, channel_id) in slots {
        if let Some(entry) = usize::try_from(slot).ok().and_then(|s| channels.get_mut(s)) {
            *entry = Some(channel_id);
        }
    }

    Ok(Some(ManagedNode {
        id,
        node_id,
        name,
        owner_id,
        channels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures::{at, gateway};

    #[test]
    fn last_heard_only_moves_forward() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_observed_node(77).unwrap();

        assert!(db.advance_last_heard(77, at(100)).unwrap());
        assert!(!db.advance_last_heard(77, at(50)).unwrap());
        assert!(!db.advance_last_heard(77, at(100)).unwrap());
        assert!(db.advance_last_heard(77, at(101)).unwrap());

        let node = db.get_observed_node(77).unwrap().unwrap();
        assert_eq!(node.last_heard, Some(at(101)));
    }

    #[test]
    fn identity_update_keeps_names_when_absent() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_observed_node(0xabcd).unwrap();

        db.update_node_identity(
            0xabcd,
            &NodeIdentity {
                short_name: Some("BASE".into()),
                long_name: Some("Base Station".into()),
                hw_model: Some("TBEAM".into()),
                sw_version: Some("2.5.1".into()),
                role: Some(Role::Router),
            },
        )
        .unwrap();
        db.update_node_identity(0xabcd, &NodeIdentity { role: Some(Role::Client), ..Default::default() })
            .unwrap();

        let node = db.get_observed_node(0xabcd).unwrap().unwrap();
        assert_eq!(node.short_name, "BASE");
        assert_eq!(node.long_name, "Base Station");
        assert_eq!(node.hw_model, None);
        assert_eq!(node.role, Some(Role::Client));
    }

    #[test]
    fn managed_node_loads_channel_slots() {
        let db = Database::open_in_memory().unwrap();
        let gw = gateway(&db, 5);
        let primary = db.create_message_channel("LongFast").unwrap();
        let admin = db.create_message_channel("Admin").unwrap();

        db.set_channel_slot(gw.id, 0, primary).unwrap();
        db.set_channel_slot(gw.id, 3, admin).unwrap();
        db.set_channel_slot(gw.id, 3, primary).unwrap();
        assert!(db.set_channel_slot(gw.id, 8, admin).is_err());

        let loaded = db.get_managed_node(gw.id).unwrap().unwrap();
        assert_eq!(loaded.channels[0], Some(primary));
        assert_eq!(loaded.channels[3], Some(primary));
        assert_eq!(loaded.channels[1], None);
        assert_eq!(loaded.name, "gw-5");
    }
}
