//! Timing and counter constants fixed by the wire protocol (§6). Policy decisions that consume
//! these (timer scheduling, rekey triggering) live in `rustyguard-core`; this crate only owns the
//! numbers themselves, the way it owns the rest of the external interface.

/// A keypair's sending counter is never allowed to reach this value; past
/// `REKEY_AFTER_MESSAGES` sent messages a rekey should be attempted.
pub const REKEY_AFTER_MESSAGES: u64 = 1 << 60;
/// Hard ceiling on messages sent/received under one keypair.
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX - (1 << 13) - 1;

/// Seconds after a keypair's creation at which a rekey should be attempted.
pub const REKEY_AFTER_TIME_SECS: u64 = 120;
/// Seconds after a keypair's creation past which it must no longer be used.
pub const REJECT_AFTER_TIME_SECS: u64 = 180;
/// Seconds an initiator will keep retrying a handshake attempt.
pub const REKEY_ATTEMPT_TIME_SECS: u64 = 90;
/// Seconds to wait before retransmitting an unanswered initiation.
pub const REKEY_TIMEOUT_SECS: u64 = 5;
/// Seconds of send-only silence before a keepalive is due.
pub const KEEPALIVE_TIMEOUT_SECS: u64 = 10;

/// Rate limit on accepted handshake initiations from a single peer.
pub const INITIATIONS_PER_SECOND: u32 = 20;
