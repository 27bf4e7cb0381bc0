//! Connection constants shared by the manager, its policy and its tests.

// Reconnection
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
pub const BACKOFF_MULTIPLIER: u32 = 2;

// Liveness
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const PROBE_TIMEOUT_MS: u64 = 5_000;
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Bound on sending our close frame during teardown
pub const CLOSE_TIMEOUT_MS: u64 = 1_000;

/// Capacity of the writer queue behind `send()`
pub const OUTBOUND_BUFFER: usize = 64;

/// Server closes with this code when the token is rejected
pub const POLICY_VIOLATION_CLOSE_CODE: u16 = 1008;
/// Close without a status frame
pub const NO_STATUS_CLOSE_CODE: u16 = 1005;

// Endpoint
pub const DEFAULT_HOST: &str = "localhost:8000";
pub const SESSION_ID_PLACEHOLDER: &str = "{session_id}";
pub const TOKEN_QUERY_PARAM: &str = "token";
