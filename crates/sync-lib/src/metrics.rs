// ==============
// crates/sync-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTED: &str = "ws.connected";
pub const WS_RECONNECTED: &str = "ws.reconnected";
pub const WS_DISCONNECTED: &str = "ws.disconnected";
pub const MESSAGE_RECEIVED: &str = "message.received";
pub const MESSAGE_SENT: &str = "message.sent";
pub const MESSAGE_SEND_FAILED: &str = "message.send_failed";
pub const NOTIFICATION_RECEIVED: &str = "notification.received";
pub const HISTORY_DISCARDED: &str = "history.discarded";
pub const BADGE_TOTAL: &str = "badge.total";
