/**
 * How long (milliseconds) a scan runs when the caller gives no duration.
 */
pub const SCAN_DURATION: u64 = 10_000;

/**
 * How long (milliseconds) a connection attempt may take before it fails with a timeout.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * How often (milliseconds) to check whether a connected link is still up.
 */
pub const LINK_POLL_DELAY: u64 = 500;

/**
 * How long (milliseconds) checking if the link is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) a best-effort disconnect may take.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * Raw signal (dBm) thresholds. Strictly above the value to reach the bucket.
 */
pub const RSSI_EXCELLENT_ABOVE: i16 = -30;
pub const RSSI_STRONG_ABOVE: i16 = -67;
pub const RSSI_MEDIUM_ABOVE: i16 = -70;

/**
 * Capacity of the channel returned by a scan. Observations beyond it are still
 * recorded in the registry, only the lazy sequence skips them.
 */
pub const SCAN_CHANNEL_CAPACITY: usize = 64;
