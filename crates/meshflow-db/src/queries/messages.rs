use anyhow::Result;
use rusqlite::params;
use uuid::Uuid;

use meshflow_types::models::TextMessage;

use super::OptionalExt;
use crate::Database;
use crate::columns::{self, encode_time};

impl Database {
    // -- Text messages --

    /// Insert unless a message for the same packet already exists. Returns true if inserted.
    pub fn insert_text_message(&self, message: &TextMessage) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO text_messages (id, packet_ref, sender_node_id, recipient_node_id, channel_id,
                                            sent_at, message_text, is_emoji, reply_to_message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(packet_ref) DO NOTHING",
                params![
                    message.id.to_string(),
                    message.packet_ref.to_string(),
                    message.sender_node_id,
                    message.recipient_node_id,
                    message.channel_id.map(|c| c.to_string()),
                    encode_time(&message.sent_at),
                    message.message_text,
                    message.is_emoji,
                    message.reply_to_message_id,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_text_message_for_packet(&self, packet_ref: Uuid) -> Result<Option<TextMessage>> {
        self.with_conn(|conn| {
            let message = conn
                .query_row(
                    "SELECT id, packet_ref, sender_node_id, recipient_node_id, channel_id, sent_at,
                            message_text, is_emoji, reply_to_message_id
                     FROM text_messages WHERE packet_ref = ?1",
                    [packet_ref.to_string()],
                    |row| {
                        Ok(TextMessage {
                            id: columns::uuid(row, 0)?,
                            packet_ref: columns::uuid(row, 1)?,
                            sender_node_id: row.get(2)?,
                            recipient_node_id: row.get(3)?,
                            channel_id: columns::opt_uuid(row, 4)?,
                            sent_at: columns::time(row, 5)?,
                            message_text: row.get(6)?,
                            is_emoji: row.get(7)?,
                            reply_to_message_id: row.get(8)?,
                        })
                    },
                )
                .optional()?;
            Ok(message)
        })
    }

    pub fn count_text_messages(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM text_messages", [], |row| row.get(0))?))
    }
}
