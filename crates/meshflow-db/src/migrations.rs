use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Node identity

        CREATE TABLE IF NOT EXISTS message_channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS managed_nodes (
            id          TEXT PRIMARY KEY,
            node_id     INTEGER NOT NULL,
            name        TEXT NOT NULL,
            owner_id    TEXT NOT NULL REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS managed_node_channels (
            managed_node_id TEXT NOT NULL REFERENCES managed_nodes(id),
            slot            INTEGER NOT NULL CHECK (slot BETWEEN 0 AND 7),
            channel_id      TEXT NOT NULL REFERENCES message_channels(id),
            PRIMARY KEY (managed_node_id, slot)
        );

        CREATE TABLE IF NOT EXISTS node_api_keys (
            id          TEXT PRIMARY KEY,
            key         TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            owner_id    TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            last_used   TEXT,
            is_active   INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS node_auth (
            api_key_id      TEXT NOT NULL REFERENCES node_api_keys(id),
            managed_node_id TEXT NOT NULL REFERENCES managed_nodes(id),
            PRIMARY KEY (api_key_id, managed_node_id)
        );

        CREATE TABLE IF NOT EXISTS observed_nodes (
            node_id     INTEGER PRIMARY KEY,
            node_id_str TEXT NOT NULL,
            long_name   TEXT NOT NULL,
            short_name  TEXT NOT NULL,
            hw_model    TEXT,
            sw_version  TEXT,
            role        INTEGER,
            mac_addr    TEXT,
            public_key  TEXT,
            last_heard  TEXT,
            claimed_by  TEXT REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS node_owner_claims (
            id          TEXT PRIMARY KEY,
            node_id     INTEGER NOT NULL REFERENCES observed_nodes(node_id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            claim_key   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            accepted_at TEXT,
            UNIQUE(node_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_claims_pending
            ON node_owner_claims(node_id, claim_key, created_at) WHERE accepted_at IS NULL;

        -- Canonical packets: one table per kind, one row per packet_id

        CREATE TABLE IF NOT EXISTS message_packets (
            id                  TEXT PRIMARY KEY,
            packet_id           INTEGER NOT NULL UNIQUE,
            from_int            INTEGER NOT NULL,
            to_int              INTEGER,
            port_num            TEXT NOT NULL,
            first_observed_time TEXT NOT NULL,
            message_text        TEXT NOT NULL,
            reply_packet_id     INTEGER,
            emoji               INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS position_packets (
            id                  TEXT PRIMARY KEY,
            packet_id           INTEGER NOT NULL UNIQUE,
            from_int            INTEGER NOT NULL,
            to_int              INTEGER,
            port_num            TEXT NOT NULL,
            first_observed_time TEXT NOT NULL,
            latitude            REAL NOT NULL,
            longitude           REAL NOT NULL,
            altitude            REAL,
            heading             REAL,
            location_source     INTEGER NOT NULL DEFAULT 0,
            precision_bits      INTEGER,
            position_time       TEXT,
            ground_speed        REAL,
            ground_track        REAL,
            sats_in_view        INTEGER,
            pdop                REAL
        );

        CREATE TABLE IF NOT EXISTS node_info_packets (
            id                  TEXT PRIMARY KEY,
            packet_id           INTEGER NOT NULL UNIQUE,
            from_int            INTEGER NOT NULL,
            to_int              INTEGER,
            port_num            TEXT NOT NULL,
            first_observed_time TEXT NOT NULL,
            node_id             TEXT NOT NULL,
            short_name          TEXT,
            long_name           TEXT,
            hw_model            TEXT,
            sw_version          TEXT,
            public_key          TEXT,
            mac_address         TEXT,
            role                INTEGER
        );

        CREATE TABLE IF NOT EXISTS device_metrics_packets (
            id                  TEXT PRIMARY KEY,
            packet_id           INTEGER NOT NULL UNIQUE,
            from_int            INTEGER NOT NULL,
            to_int              INTEGER,
            port_num            TEXT NOT NULL,
            first_observed_time TEXT NOT NULL,
            reading_time        TEXT,
            battery_level       REAL,
            voltage             REAL,
            channel_utilization REAL,
            air_util_tx         REAL,
            uptime_seconds      INTEGER
        );

        CREATE TABLE IF NOT EXISTS local_stats_packets (
            id                  TEXT PRIMARY KEY,
            packet_id           INTEGER NOT NULL UNIQUE,
            from_int            INTEGER NOT NULL,
            to_int              INTEGER,
            port_num            TEXT NOT NULL,
            first_observed_time TEXT NOT NULL,
            reading_time        TEXT,
            uptime_seconds      INTEGER,
            channel_utilization REAL,
            air_util_tx         REAL,
            num_packets_tx      INTEGER,
            num_packets_rx      INTEGER,
            num_packets_rx_bad  INTEGER,
            num_online_nodes    INTEGER,
            num_total_nodes     INTEGER,
            num_rx_dupe         INTEGER
        );

        CREATE TABLE IF NOT EXISTS environment_metrics_packets (
            id                  TEXT PRIMARY KEY,
            packet_id           INTEGER NOT NULL UNIQUE,
            from_int            INTEGER NOT NULL,
            to_int              INTEGER,
            port_num            TEXT NOT NULL,
            first_observed_time TEXT NOT NULL,
            reading_time        TEXT,
            temperature         REAL,
            relative_humidity   REAL,
            barometric_pressure REAL,
            gas_resistance      REAL,
            iaq                 REAL
        );

        -- packet_ref points into the table named by packet_kind
        CREATE TABLE IF NOT EXISTS packet_observations (
            id          TEXT PRIMARY KEY,
            packet_kind TEXT NOT NULL,
            packet_ref  TEXT NOT NULL,
            observer_id TEXT NOT NULL REFERENCES managed_nodes(id),
            channel     INTEGER,
            hop_limit   INTEGER,
            hop_start   INTEGER,
            rx_time     TEXT NOT NULL,
            rx_rssi     REAL,
            rx_snr      REAL,
            relay_node  INTEGER,
            upload_time TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_observations_packet
            ON packet_observations(packet_kind, packet_ref, upload_time);

        -- Projections

        CREATE TABLE IF NOT EXISTS text_messages (
            id                  TEXT PRIMARY KEY,
            packet_ref          TEXT NOT NULL UNIQUE REFERENCES message_packets(id),
            sender_node_id      INTEGER NOT NULL REFERENCES observed_nodes(node_id),
            recipient_node_id   INTEGER,
            channel_id          TEXT REFERENCES message_channels(id),
            sent_at             TEXT NOT NULL,
            message_text        TEXT NOT NULL,
            is_emoji            INTEGER NOT NULL DEFAULT 0,
            reply_to_message_id INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_text_messages_channel
            ON text_messages(channel_id, sent_at);

        CREATE TABLE IF NOT EXISTS positions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id         INTEGER NOT NULL REFERENCES observed_nodes(node_id),
            packet_ref      TEXT NOT NULL UNIQUE,
            logged_time     TEXT NOT NULL,
            reported_time   TEXT NOT NULL,
            latitude        REAL NOT NULL,
            longitude       REAL NOT NULL,
            altitude        REAL,
            heading         REAL,
            location_source INTEGER NOT NULL DEFAULT 0,
            precision_bits  INTEGER,
            ground_speed    REAL,
            ground_track    REAL,
            sats_in_view    INTEGER,
            pdop            REAL
        );

        CREATE TABLE IF NOT EXISTS device_metrics (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id             INTEGER NOT NULL REFERENCES observed_nodes(node_id),
            packet_ref          TEXT NOT NULL UNIQUE,
            logged_time         TEXT NOT NULL,
            reported_time       TEXT NOT NULL,
            battery_level       REAL NOT NULL,
            voltage             REAL NOT NULL,
            channel_utilization REAL NOT NULL,
            air_util_tx         REAL NOT NULL,
            uptime_seconds      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS local_stats (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id             INTEGER NOT NULL REFERENCES observed_nodes(node_id),
            packet_ref          TEXT NOT NULL UNIQUE,
            logged_time         TEXT NOT NULL,
            reported_time       TEXT NOT NULL,
            uptime_seconds      INTEGER NOT NULL,
            channel_utilization REAL NOT NULL,
            air_util_tx         REAL NOT NULL,
            num_packets_tx      INTEGER NOT NULL,
            num_packets_rx      INTEGER NOT NULL,
            num_packets_rx_bad  INTEGER NOT NULL,
            num_online_nodes    INTEGER NOT NULL,
            num_total_nodes     INTEGER NOT NULL,
            num_rx_dupe         INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS environment_metrics (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id             INTEGER NOT NULL REFERENCES observed_nodes(node_id),
            packet_ref          TEXT NOT NULL UNIQUE,
            logged_time         TEXT NOT NULL,
            reported_time       TEXT NOT NULL,
            temperature         REAL,
            relative_humidity   REAL,
            barometric_pressure REAL,
            gas_resistance      REAL,
            iaq                 REAL
        );

        CREATE INDEX IF NOT EXISTS idx_positions_node ON positions(node_id, reported_time);
        CREATE INDEX IF NOT EXISTS idx_device_metrics_node ON device_metrics(node_id, reported_time);
        CREATE INDEX IF NOT EXISTS idx_local_stats_node ON local_stats(node_id, reported_time);
        CREATE INDEX IF NOT EXISTS idx_environment_metrics_node ON environment_metrics(node_id, reported_time);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
