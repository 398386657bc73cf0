use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use meshflow_types::models::NodeOwnerClaim;

use super::OptionalExt;
use crate::Database;
use crate::columns::{self, encode_time};

const CLAIM_COLUMNS: &str = "id, node_id, user_id, claim_key, created_at, accepted_at";

impl Database {
    // -- Node owner claims --

    /// Create a pending claim. Returns `None` if this user already has a claim on the node.
    pub fn create_claim(
        &self,
        node_id: i64,
        user_id: Uuid,
        claim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NodeOwnerClaim>> {
        let claim = NodeOwnerClaim {
            id: Uuid::new_v4(),
            node_id,
            user_id,
            claim_key: claim_key.to_string(),
            created_at: now,
            accepted_at: None,
        };

        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO node_owner_claims (id, node_id, user_id, claim_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(node_id, user_id) DO NOTHING",
                params![
                    claim.id.to_string(),
                    node_id,
                    user_id.to_string(),
                    claim.claim_key,
                    encode_time(&now)
                ],
            )?;
            Ok((changed == 1).then_some(claim))
        })
    }

    pub fn get_claim(&self, node_id: i64, user_id: Uuid) -> Result<Option<NodeOwnerClaim>> {
        self.with_conn(|conn| {
            let claim = conn
                .query_row(
                    &format!("SELECT {CLAIM_COLUMNS} FROM node_owner_claims WHERE node_id = ?1 AND user_id = ?2"),
                    params![node_id, user_id.to_string()],
                    claim_from_row,
                )
                .optional()?;
            Ok(claim)
        })
    }

    /// Withdraw a user's claim. An accepted claim is removed too, but `claimed_by` on the node is kept.
    pub fn delete_claim(&self, node_id: i64, user_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM node_owner_claims WHERE node_id = ?1 AND user_id = ?2",
                params![node_id, user_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Accept the oldest pending claim on `node_id` whose key is exactly `claim_key`,
    /// and hand the node to the claiming user.
    ///
    /// Runs in one transaction; the `accepted_at IS NULL` guard on the update means
    /// only the first of several racing matches wins. Returns the accepted claim.
    pub fn accept_claim(
        &self,
        node_id: i64,
        claim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NodeOwnerClaim>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let pending = tx
                .query_row(
                    &format!(
                        "SELECT {CLAIM_COLUMNS} FROM node_owner_claims
                         WHERE node_id = ?1 AND claim_key = ?2 AND accepted_at IS NULL
                         ORDER BY created_at
                         LIMIT 1"
                    ),
                    params![node_id, claim_key],
                    claim_from_row,
                )
                .optional()?;

            let Some(mut claim) = pending else {
                return Ok(None);
            };

            let stamped = tx.execute(
                "UPDATE node_owner_claims SET accepted_at = ?2 WHERE id = ?1 AND accepted_at IS NULL",
                (claim.id.to_string(), encode_time(&now)),
            )?;
            if stamped != 1 {
                return Ok(None);
            }

            tx.execute(
                "UPDATE observed_nodes SET claimed_by = ?2 WHERE node_id = ?1",
                params![node_id, claim.user_id.to_string()],
            )?;
            tx.commit()?;

            claim.accepted_at = Some(now);
            Ok(Some(claim))
        })
    }
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<NodeOwnerClaim> {
    Ok(NodeOwnerClaim {
        id: columns::uuid(row, 0)?,
        node_id: row.get(1)?,
        user_id: columns::uuid(row, 2)?,
        claim_key: row.get(3)?,
        created_at: columns::time(row, 4)?,
        accepted_at: columns::opt_time(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures::{at, user};

    #[test]
    fn claim_is_accepted_once() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        db.ensure_observed_node(0x3ade68b1).unwrap();
        db.create_claim(0x3ade68b1, alice, "orange tiger 42", at(1)).unwrap().unwrap();

        let accepted = db.accept_claim(0x3ade68b1, "orange tiger 42", at(5)).unwrap().unwrap();
        assert_eq!(accepted.accepted_at, Some(at(5)));
        assert!(db.accept_claim(0x3ade68b1, "orange tiger 42", at(6)).unwrap().is_none());

        let node = db.get_observed_node(0x3ade68b1).unwrap().unwrap();
        assert_eq!(node.claimed_by, Some(alice));
        let stored = db.get_claim(0x3ade68b1, alice).unwrap().unwrap();
        assert_eq!(stored.accepted_at, Some(at(5)));
    }

    #[test]
    fn oldest_matching_claim_wins() {
        let db = Database::open_in_memory().unwrap();
        let early = user(&db, "early");
        let late = user(&db, "late");
        db.ensure_observed_node(10).unwrap();
        db.create_claim(10, late, "blue moon 77", at(20)).unwrap();
        db.create_claim(10, early, "blue moon 77", at(10)).unwrap();

        let accepted = db.accept_claim(10, "blue moon 77", at(30)).unwrap().unwrap();
        assert_eq!(accepted.user_id, early);
    }

    #[test]
    fn claims_are_scoped_to_node_and_key() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        db.ensure_observed_node(1).unwrap();
        db.ensure_observed_node(2).unwrap();
        db.create_claim(1, alice, "red fox 12", at(1)).unwrap();

        assert!(db.accept_claim(2, "red fox 12", at(2)).unwrap().is_none());
        assert!(db.accept_claim(1, "red fox 13", at(2)).unwrap().is_none());
        assert!(db.create_claim(1, alice, "other key 99", at(3)).unwrap().is_none());
    }

    #[test]
    fn withdrawn_claim_can_be_recreated() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        db.ensure_observed_node(4).unwrap();
        db.create_claim(4, alice, "green leaf 50", at(1)).unwrap().unwrap();

        assert!(db.delete_claim(4, alice).unwrap());
        assert!(!db.delete_claim(4, alice).unwrap());
        assert!(db.get_claim(4, alice).unwrap().is_none());
        assert!(db.create_claim(4, alice, "green leaf 51", at(2)).unwrap().is_some());
    }
}
