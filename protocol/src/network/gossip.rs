//! # Gossip Engine
//!
//! Moves transactions between this node and its neighbors. Every packet on
//! the wire is a transaction payload followed by a request hash, so each
//! packet both shares something and asks for something.
//!
//! ## Data flow
//!
//! ```text
//! datagram ─▶ process_received_data ─▶ seen-packet cache ─▶ validator
//!                  │                                          │
//!                  ▼                                          ▼
//!             reply queue                               receive queue
//!                  │                                          │
//!          reply-processor                           receive-processor
//!                  │                                          │
//!        storage / tip lookup                       store ─▶ broadcast queue
//!                  │                                          │
//!                  ▼                                          ▼
//!            packet to asker                       broadcaster ─▶ neighbors
//! ```
//!
//! ## Workers
//!
//! `start()` spawns five tokio tasks: broadcaster, tip-requester, DNS
//! refresher, receive-processor and reply-processor. They share a `watch`
//! channel; `shutdown()` flips it and waits a bounded time for all five to
//! exit. A failing iteration is logged and the worker carries on.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::{
    BROADCAST_QUEUE_SIZE, DEFAULT_P_DROP_TRANSACTION, DEFAULT_P_SELECT_MILESTONE,
    DEFAULT_P_SEND_MILESTONE, DNS_REFRESH_INTERVAL, PAUSE_BETWEEN_TRANSACTIONS,
    RECEIVE_QUEUE_SIZE, REPLY_QUEUE_SIZE, SEEN_HASHES_CACHE_SIZE, SEEN_PACKETS_CACHE_SIZE,
    SHUTDOWN_TIMEOUT, STATS_LOG_INTERVAL, TIP_REQUEST_INTERVAL, TRANSACTION_PACKET_SIZE,
    TRANSACTION_SIZE_BYTES,
};
use crate::crypto::{sha256_array, Hash};
use crate::ledger::{MilestoneIndex, TipIndex};
use crate::network::cache::DedupCache;
use crate::network::neighbor::{
    ConfigurationError, Neighbor, NeighborStats, NeighborUri, Neighbors, TransportKind,
};
use crate::network::queue::{ReceivedTransaction, ReplyRequest, WeightQueue};
use crate::network::requester::TransactionRequester;
use crate::network::transport::Transport;
use crate::storage::{StorageError, StorageResult, Tangle};
use crate::transaction::{TransactionRecord, TransactionType, TransactionValidator};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for the gossip engine. Missing fields in a config file
/// take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Neighbor URIs, `udp://host:port` or `tcp://host:port`.
    pub neighbors: Vec<String>,
    /// Probability of dropping an inbound packet before any processing.
    pub p_drop_transaction: f64,
    /// Probability of piggybacking the latest milestone hash as the request.
    pub p_select_milestone: f64,
    /// Probability of answering a random-tip request with the latest milestone.
    pub p_send_milestone: f64,
    /// Accept packets from unknown senders and add them as neighbors.
    pub permissive: bool,
    pub broadcast_queue_size: usize,
    pub receive_queue_size: usize,
    pub reply_queue_size: usize,
    pub seen_hashes_cache_size: usize,
    pub seen_packets_cache_size: usize,
    /// Pause between iterations of the queue workers, in milliseconds.
    pub pause_between_transactions_ms: u64,
    pub tip_request_interval_ms: u64,
    pub dns_refresh_interval_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            neighbors: Vec::new(),
            p_drop_transaction: DEFAULT_P_DROP_TRANSACTION,
            p_select_milestone: DEFAULT_P_SELECT_MILESTONE,
            p_send_milestone: DEFAULT_P_SEND_MILESTONE,
            permissive: false,
            broadcast_queue_size: BROADCAST_QUEUE_SIZE,
            receive_queue_size: RECEIVE_QUEUE_SIZE,
            reply_queue_size: REPLY_QUEUE_SIZE,
            seen_hashes_cache_size: SEEN_HASHES_CACHE_SIZE,
            seen_packets_cache_size: SEEN_PACKETS_CACHE_SIZE,
            pause_between_transactions_ms: PAUSE_BETWEEN_TRANSACTIONS.as_millis() as u64,
            tip_request_interval_ms: TIP_REQUEST_INTERVAL.as_millis() as u64,
            dns_refresh_interval_ms: DNS_REFRESH_INTERVAL.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} neighbors are not supported by this transport")]
    UnsupportedTransport(TransportKind),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type GossipResult<T> = Result<T, GossipError>;

// ---------------------------------------------------------------------------
// Wire packet
// ---------------------------------------------------------------------------

/// Builds a wire packet: the payload padded or cut to 1604 bytes, then the
/// 49-byte request hash.
pub fn encode_packet(payload: &[u8], request: &Hash) -> Vec<u8> {
    let mut packet = Vec::with_capacity(TRANSACTION_PACKET_SIZE);
    let len = payload.len().min(TRANSACTION_SIZE_BYTES);
    packet.extend_from_slice(&payload[..len]);
    packet.resize(TRANSACTION_SIZE_BYTES, 0);
    packet.extend_from_slice(request.as_bytes());
    packet
}

/// What happened to one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Sender is not a neighbor. In permissive mode it is one now.
    UnknownSender,
    /// Randomly dropped.
    Dropped,
    /// Wrong size or rejected by the validator.
    Invalid,
    /// Payload seen before; only the request was queued.
    Duplicate,
    /// New payload queued for storage, request queued for reply.
    Queued,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Everything the engine uses but does not own.
pub struct GossipComponents {
    pub tangle: Tangle,
    pub tips: Arc<TipIndex>,
    pub milestones: Arc<MilestoneIndex>,
    pub requester: Arc<dyn TransactionRequester>,
    pub validator: Arc<dyn TransactionValidator>,
    pub transport: Arc<dyn Transport>,
}

/// Queue and neighbor figures, as served by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStats {
    pub neighbors: usize,
    pub receive_queue: usize,
    pub broadcast_queue: usize,
    pub reply_queue: usize,
    pub pending_requests: usize,
    pub seen_packet_hits: u64,
    pub seen_packet_misses: u64,
}

pub struct GossipEngine {
    config: GossipConfig,
    tangle: Tangle,
    tips: Arc<TipIndex>,
    milestones: Arc<MilestoneIndex>,
    requester: Arc<dyn TransactionRequester>,
    validator: Arc<dyn TransactionValidator>,
    transport: Arc<dyn Transport>,
    neighbors: Neighbors,
    cache: DedupCache,
    broadcast_queue: WeightQueue<Arc<TransactionRecord>>,
    receive_queue: WeightQueue<ReceivedTransaction>,
    reply_queue: WeightQueue<ReplyRequest>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    last_stats_log: Mutex<Option<Instant>>,
}

impl GossipEngine {
    pub fn new(config: GossipConfig, components: GossipComponents) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            cache: DedupCache::new(config.seen_hashes_cache_size, config.seen_packets_cache_size),
            broadcast_queue: WeightQueue::new(config.broadcast_queue_size),
            receive_queue: WeightQueue::new(config.receive_queue_size),
            reply_queue: WeightQueue::new(config.reply_queue_size),
            tangle: components.tangle,
            tips: components.tips,
            milestones: components.milestones,
            requester: components.requester,
            validator: components.validator,
            transport: components.transport,
            neighbors: Neighbors::new(),
            shutdown,
            workers: Mutex::new(Vec::new()),
            last_stats_log: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn neighbors(&self) -> &Neighbors {
        &self.neighbors
    }

    /// A receiver that fires when the engine shuts down. Transports use it
    /// to stop their receive loops.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    // -- Neighbors ----------------------------------------------------------

    /// Resolves and adds every configured neighbor. Bad entries are logged
    /// and skipped. Returns how many were added.
    pub async fn init_neighbors(&self) -> usize {
        let mut added = 0;
        for uri in &self.config.neighbors {
            match self.add_neighbor(uri).await {
                Ok(true) => added += 1,
                Ok(false) => debug!(uri = %uri, "duplicate neighbor ignored"),
                Err(e) => error!(uri = %uri, error = %e, "neighbor dropped from configuration"),
            }
        }
        info!(added, configured = self.config.neighbors.len(), "neighbors initialized");
        added
    }

    pub async fn add_neighbor(&self, uri: &str) -> GossipResult<bool> {
        let uri = NeighborUri::parse(uri)?;
        let address = uri.resolve().await?;
        let added = self.neighbors.add(Arc::new(Neighbor::new(uri, address, true)));
        if added {
            info!(%address, "neighbor added");
        }
        Ok(added)
    }

    pub async fn remove_neighbor(&self, uri: &str) -> GossipResult<bool> {
        let uri = NeighborUri::parse(uri)?;
        let address = uri.resolve().await?;
        let removed = self.neighbors.remove(&address, uri.kind);
        if removed {
            info!(%address, "neighbor removed");
        }
        Ok(removed)
    }

    /// Re-resolves configured hostnames and swaps in a fresh neighbor for
    /// every one whose address changed. Returns the number replaced.
    pub async fn refresh_neighbors_dns(&self) -> usize {
        let mut replaced = 0;
        for neighbor in self.neighbors.snapshot().iter() {
            let uri = neighbor.uri();
            if !neighbor.is_configured() || uri.host.parse::<IpAddr>().is_ok() {
                continue;
            }
            let address = match uri.resolve().await {
                Ok(address) => address,
                Err(e) => {
                    warn!(uri = %uri, error = %e, "dns refresh failed");
                    continue;
                }
            };
            if address.ip() == neighbor.address().ip() {
                continue;
            }
            info!(uri = %uri, old = %neighbor.address(), new = %address, "neighbor address changed");
            let fresh = Arc::new(Neighbor::new(uri.clone(), address, true));
            if self.neighbors.replace(neighbor, fresh) {
                replaced += 1;
            }
        }
        replaced
    }

    // -- Inbound ------------------------------------------------------------

    /// Entry point for every inbound packet. Never blocks on storage.
    pub fn process_received_data(
        &self,
        packet: &[u8],
        sender: SocketAddr,
        kind: TransportKind,
    ) -> PacketOutcome {
        let Some(neighbor) = self.neighbors.find(&sender, kind) else {
            if self.config.permissive
                && self.neighbors.add(Arc::new(Neighbor::discovered(kind, sender)))
            {
                info!(%sender, %kind, "adding non-tethered neighbor");
            }
            return PacketOutcome::UnknownSender;
        };

        neighbor.inc_all_transactions();
        if rand::random::<f64>() < self.config.p_drop_transaction {
            trace!(%sender, "randomly dropping transaction");
            return PacketOutcome::Dropped;
        }
        if packet.len() != TRANSACTION_PACKET_SIZE {
            neighbor.inc_invalid_transactions();
            debug!(%sender, len = packet.len(), "packet with wrong size dropped");
            return PacketOutcome::Invalid;
        }

        let payload = &packet[..TRANSACTION_SIZE_BYTES];
        let digest = sha256_array(payload);
        let (hash, outcome) = match self.cache.lookup_packet(&digest) {
            Some(hash) => (hash, PacketOutcome::Duplicate),
            None => match self.validator.validate(payload) {
                Ok(record) => {
                    let hash = record.hash();
                    self.receive_queue.push(ReceivedTransaction {
                        record: Arc::new(record),
                        neighbor: Arc::clone(&neighbor),
                    });
                    self.cache.insert_packet(digest, hash);
                    (hash, PacketOutcome::Queued)
                }
                Err(e) => {
                    neighbor.inc_invalid_transactions();
                    debug!(%sender, error = %e, "invalid transaction dropped");
                    return PacketOutcome::Invalid;
                }
            },
        };

        let mut requested = Hash::from_slice(&packet[TRANSACTION_SIZE_BYTES..]);
        if !requested.is_valid() {
            debug!(%sender, "request hash is not packed trits, no reply queued");
            return outcome;
        }
        if requested == hash {
            requested = Hash::NULL;
        }
        self.reply_queue.push(ReplyRequest {
            hash: requested,
            neighbor,
        });
        outcome
    }

    /// Drains one item from the receive queue. Returns `false` if it was empty.
    pub async fn process_received_once(&self) -> bool {
        let Some(ReceivedTransaction { record, neighbor }) = self.receive_queue.pop() else {
            return false;
        };
        let hash = record.hash();
        if self.cache.contains_hash(&hash) {
            trace!(hash = %hash, "recently seen, skipping store");
            return true;
        }
        match record.store(&self.tangle).await {
            Ok(stored) => {
                self.cache.check_and_insert_hash(hash);
                if stored {
                    self.on_first_store(record, &neighbor).await;
                }
            }
            Err(e) => {
                error!(hash = %hash, error = %e, "error accessing persistence store");
                neighbor.inc_invalid_transactions();
            }
        }
        true
    }

    async fn on_first_store(&self, record: Arc<TransactionRecord>, neighbor: &Neighbor) {
        let hash = record.hash();
        let now = chrono::Utc::now().timestamp_millis();
        let sender = neighbor.address().to_string();
        if let Err(e) = self.stamp_arrival(&record, now, &sender).await {
            error!(hash = %hash, error = %e, "error updating transaction metadata");
        }
        neighbor.inc_new_transactions();
        if let Err(e) = self.update_tips(&record).await {
            warn!(hash = %hash, error = %e, "tip bookkeeping failed");
        }
        self.requester.clear(&hash);
        debug!(hash = %hash, from = %sender, "new transaction stored");
        self.broadcast(record);
    }

    async fn stamp_arrival(
        &self,
        record: &TransactionRecord,
        millis: i64,
        sender: &str,
    ) -> StorageResult<()> {
        record.set_arrival_time(&self.tangle, millis).await?;
        record.set_sender(&self.tangle, sender).await?;
        Ok(())
    }

    /// A new transaction is a tip unless something already approves it. Its
    /// trunk and branch stop being tips, and any we lack get requested.
    async fn update_tips(&self, record: &TransactionRecord) -> StorageResult<()> {
        if record.approvers(&self.tangle).await?.is_empty() {
            self.tips.add_tip(record.hash());
        }
        for parent in [record.trunk(), record.branch()] {
            self.tips.remove_tip(&parent);
            if !parent.is_null() && !TransactionRecord::exists(&self.tangle, &parent).await? {
                self.requester.request(parent);
            }
        }
        Ok(())
    }

    // -- Replies ------------------------------------------------------------

    /// Drains one item from the reply queue. Returns `false` if it was empty.
    pub async fn process_reply_once(&self) -> bool {
        let Some(ReplyRequest { hash, neighbor }) = self.reply_queue.pop() else {
            return false;
        };
        self.reply_to_request(hash, &neighbor).await;
        true
    }

    async fn reply_to_request(&self, requested: Hash, neighbor: &Neighbor) {
        let target = if requested.is_null() {
            // Random tips are only worth sending while we are still syncing.
            if self.requester.pending_count() == 0 {
                return;
            }
            neighbor.inc_random_transaction_requests();
            self.random_tip_pointer()
        } else {
            requested
        };

        let record = match TransactionRecord::load(&self.tangle, target).await {
            Ok(record) => record,
            Err(e) => {
                error!(hash = %target, error = %e, "error while searching for transaction");
                return;
            }
        };
        if record.tx_type() != TransactionType::Filled {
            trace!(hash = %target, "requested transaction not found");
            return;
        }
        if let Err(e) = self.send_packet(&record, neighbor).await {
            debug!(to = %neighbor.address(), error = %e, "reply not sent");
        }
    }

    fn random_tip_pointer(&self) -> Hash {
        let tip = if rand::random::<f64>() < self.config.p_send_milestone {
            Some(self.milestones.latest_hash())
        } else {
            self.tips.random_solid_tip()
        };
        tip.unwrap_or(Hash::NULL)
    }

    // -- Outbound -----------------------------------------------------------

    /// Queues a transaction for every neighbor.
    pub fn broadcast(&self, record: Arc<TransactionRecord>) {
        if let Some(evicted) = self.broadcast_queue.push(record) {
            trace!(hash = %evicted.hash(), "broadcast queue full, evicted");
        }
    }

    /// Sends the next queued transaction to every neighbor. Returns `false`
    /// if the queue was empty.
    pub async fn broadcast_once(&self) -> bool {
        let Some(record) = self.broadcast_queue.pop() else {
            return false;
        };
        for neighbor in self.neighbors.snapshot().iter() {
            if let Err(e) = self.send_packet(&record, neighbor).await {
                trace!(to = %neighbor.address(), error = %e, "broadcast send failed");
            }
        }
        true
    }

    /// Sends `record` to `neighbor`, piggybacking a request hash.
    pub async fn send_packet(
        &self,
        record: &TransactionRecord,
        neighbor: &Neighbor,
    ) -> GossipResult<()> {
        let request = self.request_hash_for(record);
        let packet = encode_packet(record.bytes(), &request);
        self.transport.send(neighbor, &packet).await
    }

    /// The latest milestone with probability `p_select_milestone`, otherwise
    /// whatever the requester wants. With nothing pending the record's own
    /// hash goes out, which the receiver reads as a random-tip request.
    fn request_hash_for(&self, record: &TransactionRecord) -> Hash {
        let latest = self.milestones.latest_hash();
        if !latest.is_null() && rand::random::<f64>() < self.config.p_select_milestone {
            return latest;
        }
        self.requester
            .transaction_to_request()
            .unwrap_or_else(|| record.hash())
    }

    /// Sends the latest milestone to every neighbor, asking each for a
    /// random tip in return.
    pub async fn tip_request_round(&self) -> StorageResult<usize> {
        let latest = self.milestones.latest_hash();
        let record = TransactionRecord::load(&self.tangle, latest).await?;
        let mut sent = 0;
        if record.tx_type() == TransactionType::Filled {
            let packet = encode_packet(record.bytes(), &record.hash());
            for neighbor in self.neighbors.snapshot().iter() {
                match self.transport.send(neighbor, &packet).await {
                    Ok(()) => sent += 1,
                    Err(e) => trace!(to = %neighbor.address(), error = %e, "tip request not sent"),
                }
            }
        } else {
            trace!("no latest milestone to send");
        }
        self.maybe_log_stats().await;
        Ok(sent)
    }

    // -- Statistics ---------------------------------------------------------

    pub fn stats(&self) -> GossipStats {
        let (seen_packet_hits, seen_packet_misses) = self.cache.packet_stats();
        GossipStats {
            neighbors: self.neighbors.len(),
            receive_queue: self.receive_queue.len(),
            broadcast_queue: self.broadcast_queue.len(),
            reply_queue: self.reply_queue.len(),
            pending_requests: self.requester.pending_count(),
            seen_packet_hits,
            seen_packet_misses,
        }
    }

    pub fn neighbor_stats(&self) -> Vec<NeighborStats> {
        self.neighbors.stats()
    }

    async fn maybe_log_stats(&self) {
        {
            let mut last = self.last_stats_log.lock();
            if last.is_some_and(|t| t.elapsed() < STATS_LOG_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }
        self.log_stats().await;
    }

    pub async fn log_stats(&self) {
        let stats = self.stats();
        let total = match TransactionRecord::count(&self.tangle).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "cannot count stored transactions");
                0
            }
        };
        info!(
            to_process = stats.receive_queue,
            to_broadcast = stats.broadcast_queue,
            to_request = stats.pending_requests,
            to_reply = stats.reply_queue,
            tips = self.tips.size(),
            total_transactions = total,
            "gossip queues"
        );
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Spawns the five workers. Calling it twice spawns a second set.
    pub fn start(self: &Arc<Self>) {
        let pause = Duration::from_millis(self.config.pause_between_transactions_ms);
        let tip_interval = Duration::from_millis(self.config.tip_request_interval_ms);
        let dns_interval = Duration::from_millis(self.config.dns_refresh_interval_ms);

        let handles = vec![
            self.spawn_worker("broadcaster", pause, |engine| async move {
                engine.broadcast_once().await;
            }),
            self.spawn_worker("tip-requester", tip_interval, |engine| async move {
                if let Err(e) = engine.tip_request_round().await {
                    error!(error = %e, "tip requester iteration failed");
                }
            }),
            self.spawn_worker("dns-refresher", dns_interval, |engine| async move {
                engine.refresh_neighbors_dns().await;
            }),
            self.spawn_worker("receive-processor", pause, |engine| async move {
                engine.process_received_once().await;
            }),
            self.spawn_worker("reply-processor", pause, |engine| async move {
                engine.process_reply_once().await;
            }),
        ];
        self.workers.lock().extend(handles);
        info!("gossip engine started");
    }

    fn spawn_worker<F, Fut>(self: &Arc<Self>, name: &'static str, pause: Duration, step: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            info!(worker = name, "spawning gossip worker");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                step(Arc::clone(&engine)).await;
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!(worker = name, "gossip worker stopped");
        })
    }

    /// Signals every worker and waits up to six seconds for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let count = handles.len();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles)).await {
            Ok(_) => info!(workers = count, "gossip engine stopped"),
            Err(_) => warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "gossip workers did not stop in time"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::network::requester::PendingRequests;
    use crate::storage::{MemoryProvider, PersistenceProvider};
    use crate::transaction::{StructuralValidator, TransactionBuilder, ValidationError};

    // -- Helpers ------------------------------------------------------------

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    }

    impl MockTransport {
        fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, neighbor: &Neighbor, packet: &[u8]) -> GossipResult<()> {
            self.sent.lock().push((neighbor.address(), packet.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingValidator {
        calls: AtomicUsize,
        inner: StructuralValidator,
    }

    impl TransactionValidator for CountingValidator {
        fn validate(&self, payload: &[u8]) -> Result<TransactionRecord, ValidationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.validate(payload)
        }
    }

    struct Harness {
        engine: Arc<GossipEngine>,
        transport: Arc<MockTransport>,
        validator: Arc<CountingValidator>,
        requester: Arc<PendingRequests>,
        tips: Arc<TipIndex>,
        milestones: Arc<MilestoneIndex>,
        tangle: Tangle,
    }

    fn quiet_config() -> GossipConfig {
        GossipConfig {
            p_drop_transaction: 0.0,
            p_select_milestone: 0.0,
            p_send_milestone: 0.0,
            ..GossipConfig::default()
        }
    }

    fn harness(config: GossipConfig) -> Harness {
        let provider: Arc<dyn PersistenceProvider> = Arc::new(MemoryProvider::volatile());
        let tangle = Tangle::new(vec![provider]);
        let transport = Arc::new(MockTransport::default());
        let validator = Arc::new(CountingValidator::default());
        let requester = Arc::new(PendingRequests::default());
        let tips = Arc::new(TipIndex::new());
        let milestones = Arc::new(MilestoneIndex::new(tangle.clone()));
        let engine = Arc::new(GossipEngine::new(
            config,
            GossipComponents {
                tangle: tangle.clone(),
                tips: tips.clone(),
                milestones: milestones.clone(),
                requester: requester.clone(),
                validator: validator.clone(),
                transport: transport.clone(),
            },
        ));
        Harness {
            engine,
            transport,
            validator,
            requester,
            tips,
            milestones,
            tangle,
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn add_peer(engine: &GossipEngine, address: &str) -> Arc<Neighbor> {
        let neighbor = Arc::new(Neighbor::discovered(TransportKind::Datagram, addr(address)));
        engine.neighbors().add(neighbor.clone());
        neighbor
    }

    fn tx(seed: i8, trunk: Hash, branch: Hash) -> TransactionRecord {
        TransactionBuilder::new()
            .signature_message_fragment(&[seed, 1, -1, seed])
            .trunk(trunk)
            .branch(branch)
            .build()
    }

    fn request_of(packet: &[u8]) -> Hash {
        Hash::from_slice(&packet[TRANSACTION_SIZE_BYTES..])
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let config: GossipConfig =
            serde_json::from_str(r#"{ "neighbors": ["udp://10.0.0.1:14600"], "permissive": true }"#)
                .unwrap();
        assert_eq!(config.neighbors.len(), 1);
        assert!(config.permissive);
        assert_eq!(config.receive_queue_size, RECEIVE_QUEUE_SIZE);
        assert_eq!(config.p_select_milestone, DEFAULT_P_SELECT_MILESTONE);
    }

    // -- Inbound ------------------------------------------------------------

    #[tokio::test]
    async fn duplicate_packets_validate_and_store_once() {
        let h = harness(quiet_config());
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let b = add_peer(&h.engine, "10.0.0.2:14600");
        let record = tx(1, Hash::NULL, Hash::NULL);
        let packet = encode_packet(record.bytes(), &record.hash());

        assert_eq!(
            h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram),
            PacketOutcome::Queued
        );
        assert_eq!(
            h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram),
            PacketOutcome::Duplicate
        );
        assert_eq!(h.validator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.stats().receive_queue, 1);

        assert!(h.engine.process_received_once().await);
        assert!(!h.engine.process_received_once().await);
        assert_eq!(a.new_transactions(), 1);

        // A late copy from another neighbor never reaches storage.
        assert_eq!(
            h.engine.process_received_data(&packet, b.address(), TransportKind::Datagram),
            PacketOutcome::Duplicate
        );
        assert_eq!(h.engine.stats().receive_queue, 0);
        assert_eq!(b.all_transactions(), 1);
        assert_eq!(b.new_transactions(), 0);
        assert_eq!(a.all_transactions(), 2);
    }

    #[tokio::test]
    async fn own_hash_as_request_means_random_tip() {
        let h = harness(quiet_config());
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let record = tx(1, Hash::NULL, Hash::NULL);
        let wanted = tx(-1, Hash::NULL, Hash::NULL);

        let packet = encode_packet(record.bytes(), &record.hash());
        h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram);
        let packet = encode_packet(wanted.bytes(), &wanted.hash());
        h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram);
        let packet = encode_packet(record.bytes(), &wanted.hash());
        h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram);

        let mut requested = Vec::new();
        while let Some(request) = h.engine.reply_queue.pop() {
            requested.push(request.hash);
        }
        // Both random-tip requests came from the same neighbor and collapse.
        assert_eq!(requested.len(), 2);
        assert!(requested.contains(&Hash::NULL));
        assert!(requested.contains(&wanted.hash()));
    }

    #[tokio::test]
    async fn malformed_request_hash_gets_no_reply_slot() {
        let h = harness(GossipConfig {
            reply_queue_size: 1,
            ..quiet_config()
        });
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let record = tx(1, Hash::NULL, Hash::NULL);
        let wanted = tx(-1, Hash::NULL, Hash::NULL);

        let packet = encode_packet(record.bytes(), &wanted.hash());
        h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram);

        // Byte 127 is not a packed trit group. It would unpack as all
        // trailing zeros and outrank every real request.
        let mut packet = encode_packet(wanted.bytes(), &Hash::NULL);
        packet[TRANSACTION_SIZE_BYTES] = 127;
        assert_eq!(
            h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram),
            PacketOutcome::Queued
        );

        assert_eq!(h.engine.stats().reply_queue, 1);
        let kept = h.engine.reply_queue.pop().unwrap();
        assert_eq!(kept.hash, wanted.hash());
        assert_eq!(a.invalid_transactions(), 0);
    }

    #[tokio::test]
    async fn unknown_senders_are_ignored_unless_permissive() {
        let h = harness(quiet_config());
        let record = tx(1, Hash::NULL, Hash::NULL);
        let packet = encode_packet(record.bytes(), &Hash::NULL);
        let stranger = addr("10.9.9.9:14600");

        assert_eq!(
            h.engine.process_received_data(&packet, stranger, TransportKind::Datagram),
            PacketOutcome::UnknownSender
        );
        assert!(h.engine.neighbors().is_empty());

        let h = harness(GossipConfig {
            permissive: true,
            ..quiet_config()
        });
        h.engine.process_received_data(&packet, stranger, TransportKind::Datagram);
        assert_eq!(h.engine.neighbors().len(), 1);
        assert_eq!(
            h.engine.process_received_data(&packet, stranger, TransportKind::Datagram),
            PacketOutcome::Queued
        );
    }

    #[tokio::test]
    async fn invalid_packets_bump_the_invalid_counter() {
        let h = harness(quiet_config());
        let a = add_peer(&h.engine, "10.0.0.1:14600");

        let short = vec![0u8; 100];
        assert_eq!(
            h.engine.process_received_data(&short, a.address(), TransportKind::Datagram),
            PacketOutcome::Invalid
        );
        // 122 is not a valid trit byte.
        let garbage = vec![122u8; TRANSACTION_PACKET_SIZE];
        assert_eq!(
            h.engine.process_received_data(&garbage, a.address(), TransportKind::Datagram),
            PacketOutcome::Invalid
        );
        assert_eq!(a.invalid_transactions(), 2);
        assert_eq!(a.all_transactions(), 2);
        assert_eq!(h.engine.stats().reply_queue, 0);
    }

    #[tokio::test]
    async fn certain_drop_discards_before_validation() {
        let h = harness(GossipConfig {
            p_drop_transaction: 1.0,
            ..quiet_config()
        });
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let record = tx(1, Hash::NULL, Hash::NULL);
        let packet = encode_packet(record.bytes(), &Hash::NULL);
        assert_eq!(
            h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram),
            PacketOutcome::Dropped
        );
        assert_eq!(h.validator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(a.all_transactions(), 1);
    }

    // -- Store and broadcast ------------------------------------------------

    #[tokio::test]
    async fn first_store_updates_metadata_tips_and_requests() {
        let h = harness(quiet_config());
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let parent = tx(1, Hash::NULL, Hash::NULL);
        parent.store(&h.tangle).await.unwrap();
        h.tips.add_tip(parent.hash());
        let missing = Hash::calculate(&[1, 1, 1]);
        let child = tx(-1, parent.hash(), missing);

        let packet = encode_packet(child.bytes(), &child.hash());
        h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram);
        h.engine.process_received_once().await;

        let stored = TransactionRecord::load(&h.tangle, child.hash()).await.unwrap();
        assert_eq!(stored.tx_type(), TransactionType::Filled);
        assert!(stored.arrival_time() > 0);
        assert_eq!(stored.sender(), "10.0.0.1:14600");

        assert!(h.tips.is_tip(&child.hash()));
        assert!(!h.tips.is_tip(&parent.hash()));
        assert!(h.requester.contains(&missing));
        assert!(!h.requester.contains(&parent.hash()));
        assert_eq!(h.engine.stats().broadcast_queue, 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_neighbor() {
        let h = harness(quiet_config());
        add_peer(&h.engine, "10.0.0.1:14600");
        add_peer(&h.engine, "10.0.0.2:14600");
        let record = Arc::new(tx(1, Hash::NULL, Hash::NULL));

        h.engine.broadcast(record.clone());
        assert!(h.engine.broadcast_once().await);
        assert!(!h.engine.broadcast_once().await);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        for (_, packet) in &sent {
            assert_eq!(packet.len(), TRANSACTION_PACKET_SIZE);
            assert_eq!(&packet[..TRANSACTION_SIZE_BYTES], record.bytes());
            // Nothing pending: the record's own hash asks for a random tip.
            assert_eq!(request_of(packet), record.hash());
        }
    }

    #[tokio::test]
    async fn outbound_requests_prefer_pending_hashes() {
        let h = harness(quiet_config());
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let record = tx(1, Hash::NULL, Hash::NULL);
        let pending = Hash::calculate(&[0, 0, 1]);
        h.requester.request(pending);

        h.engine.send_packet(&record, &a).await.unwrap();
        assert_eq!(request_of(&h.transport.sent()[0].1), pending);
    }

    #[tokio::test]
    async fn outbound_requests_can_carry_the_latest_milestone() {
        let h = harness(GossipConfig {
            p_select_milestone: 1.0,
            ..quiet_config()
        });
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let milestone = Hash::calculate(&[1, -1, 1]);
        h.milestones.create(3, milestone).await.unwrap();

        h.engine.send_packet(&tx(1, Hash::NULL, Hash::NULL), &a).await.unwrap();
        assert_eq!(request_of(&h.transport.sent()[0].1), milestone);
    }

    // -- Replies ------------------------------------------------------------

    #[tokio::test]
    async fn replies_send_stored_transactions_only() {
        let h = harness(quiet_config());
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let record = tx(1, Hash::NULL, Hash::NULL);
        record.store(&h.tangle).await.unwrap();

        h.engine.reply_queue.push(ReplyRequest {
            hash: Hash::calculate(&[1, 0, 0, 1]),
            neighbor: a.clone(),
        });
        assert!(h.engine.process_reply_once().await);
        assert!(h.transport.sent().is_empty());

        h.engine.reply_queue.push(ReplyRequest {
            hash: record.hash(),
            neighbor: a.clone(),
        });
        h.engine.process_reply_once().await;
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0].1[..TRANSACTION_SIZE_BYTES], record.bytes());
    }

    #[tokio::test]
    async fn random_tip_replies_only_while_requests_are_pending() {
        let h = harness(quiet_config());
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        let tip = tx(1, Hash::NULL, Hash::NULL);
        tip.store(&h.tangle).await.unwrap();
        h.tips.add_tip(tip.hash());
        h.tips.set_solid(&tip.hash());

        h.engine.reply_queue.push(ReplyRequest {
            hash: Hash::NULL,
            neighbor: a.clone(),
        });
        h.engine.process_reply_once().await;
        assert!(h.transport.sent().is_empty());
        assert_eq!(a.random_transaction_requests(), 0);

        h.requester.request(Hash::calculate(&[0, 1, 1]));
        h.engine.reply_queue.push(ReplyRequest {
            hash: Hash::NULL,
            neighbor: a.clone(),
        });
        h.engine.process_reply_once().await;
        assert_eq!(a.random_transaction_requests(), 1);
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0].1[..TRANSACTION_SIZE_BYTES], tip.bytes());
    }

    #[tokio::test]
    async fn tip_request_sends_latest_milestone_with_its_own_hash() {
        let h = harness(quiet_config());
        add_peer(&h.engine, "10.0.0.1:14600");
        add_peer(&h.engine, "10.0.0.2:14600");
        assert_eq!(h.engine.tip_request_round().await.unwrap(), 0);

        let milestone = tx(1, Hash::NULL, Hash::NULL);
        milestone.store(&h.tangle).await.unwrap();
        h.milestones.create(1, milestone.hash()).await.unwrap();

        assert_eq!(h.engine.tip_request_round().await.unwrap(), 2);
        for (_, packet) in h.transport.sent() {
            assert_eq!(request_of(&packet), milestone.hash());
        }
    }

    // -- Lifecycle ----------------------------------------------------------

    #[tokio::test]
    async fn workers_gossip_until_shutdown() {
        let h = harness(GossipConfig {
            tip_request_interval_ms: 60_000,
            dns_refresh_interval_ms: 60_000,
            ..quiet_config()
        });
        let a = add_peer(&h.engine, "10.0.0.1:14600");
        add_peer(&h.engine, "10.0.0.2:14600");
        h.engine.start();

        let record = tx(1, Hash::NULL, Hash::NULL);
        let packet = encode_packet(record.bytes(), &record.hash());
        h.engine.process_received_data(&packet, a.address(), TransportKind::Datagram);

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.transport.sent().len() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.engine.shutdown().await;

        assert!(TransactionRecord::exists(&h.tangle, &record.hash()).await.unwrap());
        assert!(h.transport.sent().len() >= 2);
        assert!(h.engine.workers.lock().is_empty());
    }

    #[tokio::test]
    async fn configured_neighbors_skip_bad_entries() {
        let h = harness(GossipConfig {
            neighbors: vec![
                "udp://127.0.0.1:14600".into(),
                "http://127.0.0.1:80".into(),
                "udp://127.0.0.1:14600".into(),
                "tcp://127.0.0.1:15600".into(),
            ],
            ..quiet_config()
        });
        assert_eq!(h.engine.init_neighbors().await, 2);
        assert!(h.engine.neighbors().snapshot().iter().all(|n| n.is_configured()));

        assert!(h.engine.remove_neighbor("tcp://127.0.0.1:15600").await.unwrap());
        assert_eq!(h.engine.neighbors().len(), 1);
        // IP literals never change, so the refresher leaves them alone.
        assert_eq!(h.engine.refresh_neighbors_dns().await, 0);
    }
}
