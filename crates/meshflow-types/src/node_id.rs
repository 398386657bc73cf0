//! Meshtastic node numbers and their `!xxxxxxxx` text form.

/// Reserved recipient meaning "every node on this channel".
pub const BROADCAST_ID: i64 = 0xFFFF_FFFF;

/// Render a node number the way Meshtastic clients display it (`!3ade68b1`).
pub fn node_id_to_hex(node_id: i64) -> String {
    if node_id == BROADCAST_ID {
        return "^all".to_string();
    }
    format!("!{:08x}", node_id)
}

/// Parse `!xxxxxxxx` (or `^all`) back into a node number.
pub fn hex_to_node_id(value: &str) -> Option<i64> {
    if value == "^all" {
        return Some(BROADCAST_ID);
    }
    let digits = value.strip_prefix('!')?;
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    i64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_padded_hex() {
        assert_eq!(node_id_to_hex(0x3ade68b1), "!3ade68b1");
        assert_eq!(node_id_to_hex(0x1234), "!00001234");
        assert_eq!(node_id_to_hex(BROADCAST_ID), "^all");
    }

    #[test]
    fn parses_hex_forms() {
        assert_eq!(hex_to_node_id("!3ade68b1"), Some(0x3ade68b1));
        assert_eq!(hex_to_node_id("^all"), Some(BROADCAST_ID));
        assert_eq!(hex_to_node_id("3ade68b1"), None);
        assert_eq!(hex_to_node_id("!"), None);
        assert_eq!(hex_to_node_id("!zzzz"), None);
    }

    #[test]
    fn rejects_signs_and_overlong_ids() {
        assert_eq!(hex_to_node_id("!-1"), None);
        assert_eq!(hex_to_node_id("!+ff"), None);
        assert_eq!(hex_to_node_id("!1ffffffff"), None);
        assert_eq!(hex_to_node_id("!ff"), Some(0xff));
        assert_eq!(hex_to_node_id("!FFFFFFFE"), Some(0xffff_fffe));
    }
}
