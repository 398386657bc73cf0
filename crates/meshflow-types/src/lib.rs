pub mod api;
pub mod events;
pub mod models;
pub mod node_id;

pub use node_id::{BROADCAST_ID, hex_to_node_id, node_id_to_hex};
