//! # Network Module
//!
//! Neighbor-to-neighbor gossip for the tangle node.
//!
//! ```text
//! neighbor.rs  — neighbor URIs, counters and the copy-on-write neighbor set
//! queue.rs     — weight-ordered bounded queues (broadcast, receive, reply)
//! cache.rs     — seen-packet and seen-hash LRU caches
//! requester.rs — outstanding hashes to piggyback on outbound packets
//! transport.rs — the Transport trait and the UDP socket behind it
//! gossip.rs    — GossipEngine: inbound pipeline, replies, the five workers
//! ```
//!
//! ## Design Decisions
//!
//! - Queues are `parking_lot::Mutex<BTreeMap>` keyed by a total priority
//!   order, so dequeue order never depends on arrival order.
//! - Workers are tokio tasks stopped by one `watch` channel. Storage calls
//!   run on the blocking pool and never stall the receive path.
//! - Inbound processing is synchronous up to the receive queue. Storage is
//!   only touched by the receive-processor and reply-processor.

pub mod cache;
pub mod gossip;
pub mod neighbor;
pub mod queue;
pub mod requester;
pub mod transport;

pub use cache::{DedupCache, PacketDigest};
pub use gossip::{
    encode_packet, GossipComponents, GossipConfig, GossipEngine, GossipError, GossipResult,
    GossipStats, PacketOutcome,
};
pub use neighbor::{
    ConfigurationError, Neighbor, NeighborList, NeighborStats, NeighborUri, Neighbors,
    TransportKind,
};
pub use queue::{Prioritized, PriorityKey, ReceivedTransaction, ReplyRequest, WeightQueue};
pub use requester::{PendingRequests, TransactionRequester};
pub use transport::{Transport, UdpTransport};
