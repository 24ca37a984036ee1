// ==============
// relay-backend/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const MEETING_CREATED: &str = "meeting.created";
pub const MEETING_JOINED: &str = "meeting.joined";
pub const MEETING_RECONNECTED: &str = "meeting.reconnected";
pub const MEETING_JOIN_REJECTED: &str = "meeting.join_rejected";
pub const MEETING_ENDED: &str = "meeting.ended";
pub const RELAY_SENT: &str = "relay.sent";
pub const RELAY_DROPPED: &str = "relay.dropped";
pub const RELAY_TARGET_MISSING: &str = "relay.target_missing";
pub const DISCONNECT_FAILED: &str = "teardown.disconnect_failed";
pub const MESSAGE_REJECTED: &str = "message.rejected";
