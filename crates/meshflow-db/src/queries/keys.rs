use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::OptionalExt;
use super::nodes::query_managed_node;
use crate::Database;
use crate::columns::{self, encode_time};
use crate::models::ApiKeyLookup;

impl Database {
    // -- Node API keys --

    pub fn create_node_api_key(&self, key: &str, name: &str, owner_id: Uuid) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO node_api_keys (id, key, name, owner_id) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), key, name, owner_id.to_string()],
            )?;
            Ok(id)
        })
    }

    pub fn link_api_key(&self, api_key_id: Uuid, managed_node_id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO node_auth (api_key_id, managed_node_id) VALUES (?1, ?2)",
                (api_key_id.to_string(), managed_node_id.to_string()),
            )?;
            Ok(())
        })
    }

    pub fn set_api_key_active(&self, api_key_id: Uuid, active: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE node_api_keys SET is_active = ?2 WHERE id = ?1",
                params![api_key_id.to_string(), active],
            )?;
            Ok(())
        })
    }

    /// Resolve an ingest key to the gateway it speaks for, stamping `last_used`.
    pub fn observer_for_api_key(&self, key: &str, now: DateTime<Utc>) -> Result<ApiKeyLookup> {
        self.with_conn_mut(|conn| {
            let Some(key_id) = conn
                .query_row(
                    "SELECT id FROM node_api_keys WHERE key = ?1 AND is_active = 1",
                    [key],
                    |row| columns::uuid(row, 0),
                )
                .optional()?
            else {
                return Ok(ApiKeyLookup::Unknown);
            };

            conn.execute(
                "UPDATE node_api_keys SET last_used = ?2 WHERE id = ?1",
                (key_id.to_string(), encode_time(&now)),
            )?;

            let mut stmt = conn.prepare("SELECT managed_node_id FROM node_auth WHERE api_key_id = ?1")?;
            let linked = stmt
                .query_map([key_id.to_string()], |row| columns::uuid(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            match linked.as_slice() {
                [] => Ok(ApiKeyLookup::Unlinked),
                [managed_node_id] => Ok(query_managed_node(conn, *managed_node_id)?
                    .map_or(ApiKeyLookup::Unlinked, ApiKeyLookup::Observer)),
                _ => Ok(ApiKeyLookup::Ambiguous),
            }
        })
    }
}
