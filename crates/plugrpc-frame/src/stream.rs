//! Reserved stream IDs.
//!
//! Stream 0 carries the primary RPC connection of a session. The highest ID
//! carries stream lifecycle control frames and is never handed to callers.

/// Primary RPC stream established at session start.
pub const PRIMARY_STREAM: u32 = 0;

/// Stream lifecycle messages (open, accept, close).
pub const CONTROL_STREAM: u32 = u32::MAX;

/// Returns a human-readable name for a stream ID.
pub fn stream_name(id: u32) -> &'static str {
    match id {
        PRIMARY_STREAM => "PRIMARY",
        CONTROL_STREAM => "CONTROL",
        _ => "DYNAMIC",
    }
}

/// Returns true if the ID may not be handed out by an allocator.
pub fn is_reserved(id: u32) -> bool {
    id == PRIMARY_STREAM || id == CONTROL_STREAM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_reservations() {
        assert_eq!(stream_name(0), "PRIMARY");
        assert_eq!(stream_name(u32::MAX), "CONTROL");
        assert_eq!(stream_name(7), "DYNAMIC");
        assert!(is_reserved(PRIMARY_STREAM));
        assert!(is_reserved(CONTROL_STREAM));
        assert!(!is_reserved(1));
    }
}
