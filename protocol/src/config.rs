//! # Protocol Configuration & Constants
//!
//! Every magic number in the tangle node lives here. If you're hardcoding a
//! constant somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! The transaction layout constants are a wire contract shared with every
//! other node on the network. Changing any of them forks you off the tangle,
//! so don't.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string of the node protocol.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Ternary Encoding
// ---------------------------------------------------------------------------

/// Number of trits packed into one byte. 3^5 = 243 fits in an `i8`.
pub const TRITS_PER_BYTE: usize = 5;

/// Number of trits in one tryte (a human-readable `9A-Z` character).
pub const TRITS_PER_TRYTE: usize = 3;

/// Number of trits in a hash.
pub const HASH_TRIT_SIZE: usize = 243;

/// Number of bytes a packed hash occupies: ceil(243 / 5).
pub const HASH_SIZE_BYTES: usize = 49;

// ---------------------------------------------------------------------------
// Transaction Layout
// ---------------------------------------------------------------------------
//
// Field order and sizes below are fixed by the wire format. Offsets are in
// trits, relative to the start of the transaction payload.

pub const SIGNATURE_MESSAGE_FRAGMENT_TRIT_OFFSET: usize = 0;
pub const SIGNATURE_MESSAGE_FRAGMENT_TRIT_SIZE: usize = 6561;

pub const ADDRESS_TRIT_OFFSET: usize =
    SIGNATURE_MESSAGE_FRAGMENT_TRIT_OFFSET + SIGNATURE_MESSAGE_FRAGMENT_TRIT_SIZE;
pub const ADDRESS_TRIT_SIZE: usize = 243;

pub const VALUE_TRIT_OFFSET: usize = ADDRESS_TRIT_OFFSET + ADDRESS_TRIT_SIZE;
pub const VALUE_TRIT_SIZE: usize = 81;
/// Only the low 33 trits of the value field carry the amount. The rest must
/// be zero.
pub const VALUE_USABLE_TRIT_SIZE: usize = 33;

pub const TAG_TRIT_OFFSET: usize = VALUE_TRIT_OFFSET + VALUE_TRIT_SIZE;
pub const TAG_TRIT_SIZE: usize = 81;
/// Packed size of a tag: ceil(81 / 5).
pub const TAG_SIZE_BYTES: usize = 17;

pub const TIMESTAMP_TRIT_OFFSET: usize = TAG_TRIT_OFFSET + TAG_TRIT_SIZE;
pub const TIMESTAMP_TRIT_SIZE: usize = 27;

pub const CURRENT_INDEX_TRIT_OFFSET: usize = TIMESTAMP_TRIT_OFFSET + TIMESTAMP_TRIT_SIZE;
pub const CURRENT_INDEX_TRIT_SIZE: usize = 27;

pub const LAST_INDEX_TRIT_OFFSET: usize = CURRENT_INDEX_TRIT_OFFSET + CURRENT_INDEX_TRIT_SIZE;
pub const LAST_INDEX_TRIT_SIZE: usize = 27;

pub const BUNDLE_TRIT_OFFSET: usize = LAST_INDEX_TRIT_OFFSET + LAST_INDEX_TRIT_SIZE;
pub const BUNDLE_TRIT_SIZE: usize = 243;

pub const TRUNK_TRIT_OFFSET: usize = BUNDLE_TRIT_OFFSET + BUNDLE_TRIT_SIZE;
pub const TRUNK_TRIT_SIZE: usize = 243;

pub const BRANCH_TRIT_OFFSET: usize = TRUNK_TRIT_OFFSET + TRUNK_TRIT_SIZE;
pub const BRANCH_TRIT_SIZE: usize = 243;

pub const NONCE_TRIT_OFFSET: usize = BRANCH_TRIT_OFFSET + BRANCH_TRIT_SIZE;
pub const NONCE_TRIT_SIZE: usize = 243;

/// Total number of trits in a transaction: 8019.
pub const TRANSACTION_TRIT_SIZE: usize = NONCE_TRIT_OFFSET + NONCE_TRIT_SIZE;

/// Packed size of a transaction payload: ceil(8019 / 5) = 1604 bytes.
pub const TRANSACTION_SIZE_BYTES: usize =
    (TRANSACTION_TRIT_SIZE + TRITS_PER_BYTE - 1) / TRITS_PER_BYTE;

/// Maximum absolute transaction value: (3^33 - 1) / 2.
pub const SUPPLY: i64 = 2_779_530_283_277_761;

// ---------------------------------------------------------------------------
// Wire Packet
// ---------------------------------------------------------------------------

/// Bytes of the piggybacked request hash trailing every packet.
pub const REQUEST_HASH_SIZE: usize = HASH_SIZE_BYTES;

/// Full datagram size: payload followed by the request hash. 1653 bytes.
pub const TRANSACTION_PACKET_SIZE: usize = TRANSACTION_SIZE_BYTES + REQUEST_HASH_SIZE;

// ---------------------------------------------------------------------------
// Gossip Defaults
// ---------------------------------------------------------------------------

/// Capacity of the broadcast queue.
pub const BROADCAST_QUEUE_SIZE: usize = 1000;

/// Capacity of the receive queue.
pub const RECEIVE_QUEUE_SIZE: usize = 1000;

/// Capacity of the reply queue.
pub const REPLY_QUEUE_SIZE: usize = 1000;

/// Capacity of the recently-stored transaction hash cache.
pub const SEEN_HASHES_CACHE_SIZE: usize = 5_000;

/// Capacity of the recently-received packet digest cache.
pub const SEEN_PACKETS_CACHE_SIZE: usize = 15_000;

/// The packet cache hit/miss ratio is logged (and reset) every this many lookups.
pub const CACHE_STATS_INTERVAL: u64 = 50_000;

/// Probability of dropping an inbound transaction. Simulated packet loss,
/// zero on a healthy network.
pub const DEFAULT_P_DROP_TRANSACTION: f64 = 0.0;

/// Probability of piggybacking the latest milestone hash as the request.
pub const DEFAULT_P_SELECT_MILESTONE: f64 = 0.7;

/// Probability of answering a random-tip request with the latest milestone.
pub const DEFAULT_P_SEND_MILESTONE: f64 = 0.02;

// ---------------------------------------------------------------------------
// Worker Timing
// ---------------------------------------------------------------------------

/// Pause between two iterations of the broadcaster and the queue processors.
pub const PAUSE_BETWEEN_TRANSACTIONS: Duration = Duration::from_millis(1);

/// How often the tip requester pushes the latest milestone to every neighbor.
pub const TIP_REQUEST_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum time between two queue-statistics log lines.
pub const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// How often neighbor hostnames are re-resolved.
pub const DNS_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Upper bound on how long `shutdown()` waits for the workers to exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(6);

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

/// Maximum number of hashes the requester keeps outstanding.
pub const MAX_PENDING_REQUESTS: usize = 10_000;

// ---------------------------------------------------------------------------
// Network Ports
// ---------------------------------------------------------------------------

/// Default UDP gossip port.
pub const DEFAULT_UDP_PORT: u16 = 14600;

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 14265;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 14266;
