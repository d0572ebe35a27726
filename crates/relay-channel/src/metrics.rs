//! Metric names emitted by channels.
//!
//! Counters are recorded through the `metrics` facade; with no recorder
//! installed they are no-ops.

/// Connect attempts made (counter, labels: service, role).
pub const CHANNEL_CONNECT_ATTEMPTS_TOTAL: &str = "channel_connect_attempts_total";
/// Outgoing messages acknowledged by the transport (counter, labels: service, role).
pub const CHANNEL_MESSAGES_SENT_TOTAL: &str = "channel_messages_sent_total";
/// Incoming messages handed to the handler (counter, labels: service, role).
pub const CHANNEL_MESSAGES_RECEIVED_TOTAL: &str = "channel_messages_received_total";
/// Channels that exhausted their reconnect budget (counter, labels: service, role).
pub const CHANNEL_EXHAUSTED_TOTAL: &str = "channel_exhausted_total";
