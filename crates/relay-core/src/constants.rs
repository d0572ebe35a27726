//! Default tuning values shared by the settings crate and the runtime crates.

use std::time::Duration;

/// Delay between a terminal transport event and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1_000);

/// Consecutive connection attempts allowed before a channel fails for good.
pub const MAX_CONNECT_ATTEMPTS: u32 = 15;

/// Readiness window for an outbound (initiator) transport.
pub const INITIATOR_READY_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Readiness window for an inbound (acceptor) transport to receive its peer.
pub const ACCEPTOR_READY_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Pause between two queue items in the broadcast loop.
pub const BROADCAST_PAUSE: Duration = Duration::from_millis(10);

/// Sentinel TTL value meaning "never expire".
pub const TTL_NEVER: i64 = -1;

/// Default TTL for lists, maps and sets.
pub const DEFAULT_TTL_SECS: i64 = 5 * 60;

/// Lifetime of a session's online marker.
pub const ONLINE_TTL_SECS: u64 = 60;

/// Batch size used when paging through an ordered map.
pub const PAGE_SIZE: usize = 100;

/// `COUNT` hint used for incremental set scans.
pub const SCAN_COUNT: usize = 100;

/// How long a store call may wait for connectivity before failing.
pub const STORE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval of the store liveness ping.
pub const STORE_PING_INTERVAL: Duration = Duration::from_secs(30);

/// How often an attached session polls its backlog and refreshes its marker.
pub const BACKLOG_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
