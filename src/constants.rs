//! Protocol constants and server configuration defaults

/// Default FastAGI port Asterisk connects to
pub const DEFAULT_AGI_PORT: u16 = 4573;

/// Default bind host for the FastAGI listener
pub const DEFAULT_BIND_HOST: &str = "localhost";

/// Minimum number of worker tasks kept alive for connection processing
pub const DEFAULT_MIN_WORKERS: usize = 5;

/// Maximum number of worker tasks allowed for connection processing
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Number of connections a worker handles before retiring
pub const DEFAULT_JOBS_PER_WORKER: usize = 50;

/// Protocol line terminator — AGI is newline-delimited in both directions
pub const LINE_TERMINATOR: &str = "\n";

/// Maximum accepted response/parameter line length (64KB).
/// No legitimate AGI line comes close; longer input means a confused
/// or malicious peer.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Status code Asterisk sends for every well-formed command response
pub const STATUS_SUCCESS: u16 = 200;

/// Marker Asterisk appends when a wait-style command timed out
pub const TIMEOUT_MARKER: &str = "(timeout)";

/// Monitor control-loop tick in milliseconds
pub const MONITOR_TICK_MS: u64 = 1000;

/// Occupancy stats are logged every this many monitor ticks (when enabled)
pub const STATS_POLL_INTERVAL: u64 = 10;
