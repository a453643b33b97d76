//! # Neighbors
//!
//! A tangle node gossips with a fixed, operator-chosen set of neighbors
//! rather than a discovered swarm. Each neighbor is a `udp://` or `tcp://`
//! URI resolved to a socket address, plus counters that tell the operator
//! whether that neighbor is pulling its weight.
//!
//! The collection is copy-on-write: workers iterate an `Arc` snapshot while
//! permissive-mode discovery or the DNS refresher swap in a new list, so
//! iteration never blocks a mutation and never sees a half-applied one.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A neighbor entry that cannot be used. Logged and skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid neighbor uri {0:?}: expected udp://host:port or tcp://host:port")]
    InvalidUri(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("cannot resolve neighbor host {host}: {reason}")]
    Unresolvable { host: String, reason: String },
}

// ---------------------------------------------------------------------------
// Transport kind
// ---------------------------------------------------------------------------

/// How packets reach a neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// UDP, one packet per datagram.
    Datagram,
    /// TCP, packets on a stream.
    Stream,
}

impl TransportKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Datagram => "udp",
            Self::Stream => "tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

// ---------------------------------------------------------------------------
// URI
// ---------------------------------------------------------------------------

/// A parsed, not yet resolved, neighbor URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborUri {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
}

impl NeighborUri {
    /// Parses `udp://host:port` or `tcp://host:port`. IPv6 hosts go in
    /// brackets: `udp://[::1]:14600`. Userinfo, paths, queries and
    /// fragments are rejected.
    pub fn parse(uri: &str) -> Result<Self, ConfigurationError> {
        let invalid = || ConfigurationError::InvalidUri(uri.to_string());
        let parsed = Url::parse(uri.trim()).map_err(|_| invalid())?;
        let kind = match parsed.scheme() {
            "udp" => TransportKind::Datagram,
            "tcp" => TransportKind::Stream,
            other => return Err(ConfigurationError::UnsupportedScheme(other.to_string())),
        };
        if !parsed.username().is_empty()
            || parsed.password().is_some()
            || !matches!(parsed.path(), "" | "/")
            || parsed.query().is_some()
            || parsed.fragment().is_some()
        {
            return Err(invalid());
        }
        let host = match parsed.host().ok_or_else(invalid)? {
            Host::Domain(domain) if !domain.is_empty() => domain.to_string(),
            Host::Domain(_) => return Err(invalid()),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };
        let port = parsed.port().ok_or_else(invalid)?;
        Ok(Self { kind, host, port })
    }

    /// Resolves the host through the system resolver. The first address
    /// wins.
    pub async fn resolve(&self) -> Result<SocketAddr, ConfigurationError> {
        let unresolvable = |reason: String| ConfigurationError::Unresolvable {
            host: self.host.clone(),
            reason,
        };
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| unresolvable(e.to_string()))?;
        addrs
            .next()
            .ok_or_else(|| unresolvable("no addresses returned".to_string()))
    }
}

impl fmt::Display for NeighborUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.kind, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.kind, self.host, self.port)
        }
    }
}

// ---------------------------------------------------------------------------
// Neighbor
// ---------------------------------------------------------------------------

/// Counter snapshot, as served by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborStats {
    pub address: String,
    pub connection_type: TransportKind,
    pub configured: bool,
    pub all_transactions: u64,
    pub new_transactions: u64,
    pub invalid_transactions: u64,
    pub random_transaction_requests: u64,
}

/// One peer and its traffic counters.
#[derive(Debug)]
pub struct Neighbor {
    uri: NeighborUri,
    address: SocketAddr,
    configured: bool,
    all_transactions: AtomicU64,
    new_transactions: AtomicU64,
    invalid_transactions: AtomicU64,
    random_transaction_requests: AtomicU64,
}

impl Neighbor {
    pub fn new(uri: NeighborUri, address: SocketAddr, configured: bool) -> Self {
        Self {
            uri,
            address,
            configured,
            all_transactions: AtomicU64::new(0),
            new_transactions: AtomicU64::new(0),
            invalid_transactions: AtomicU64::new(0),
            random_transaction_requests: AtomicU64::new(0),
        }
    }

    /// A neighbor that contacted us first. Its URI is its socket address.
    pub fn discovered(kind: TransportKind, address: SocketAddr) -> Self {
        let uri = NeighborUri {
            kind,
            host: address.ip().to_string(),
            port: address.port(),
        };
        Self::new(uri, address, false)
    }

    pub fn uri(&self) -> &NeighborUri {
        &self.uri
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn kind(&self) -> TransportKind {
        self.uri.kind
    }

    /// `true` for neighbors from configuration, `false` for discovered ones.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Does a packet from `sender` over `kind` belong to this neighbor?
    /// Datagrams must match the full socket address; streams only the IP,
    /// since the remote side connects from an ephemeral port.
    pub fn matches(&self, sender: &SocketAddr, kind: TransportKind) -> bool {
        if kind != self.kind() {
            return false;
        }
        match kind {
            TransportKind::Datagram => self.address == *sender,
            TransportKind::Stream => self.address.ip() == sender.ip(),
        }
    }

    // -- Counters -----------------------------------------------------------

    pub fn inc_all_transactions(&self) {
        self.all_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_new_transactions(&self) {
        self.new_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalid_transactions(&self) {
        self.invalid_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_random_transaction_requests(&self) {
        self.random_transaction_requests
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn all_transactions(&self) -> u64 {
        self.all_transactions.load(Ordering::Relaxed)
    }

    pub fn new_transactions(&self) -> u64 {
        self.new_transactions.load(Ordering::Relaxed)
    }

    pub fn invalid_transactions(&self) -> u64 {
        self.invalid_transactions.load(Ordering::Relaxed)
    }

    pub fn random_transaction_requests(&self) -> u64 {
        self.random_transaction_requests.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> NeighborStats {
        NeighborStats {
            address: self.address.to_string(),
            connection_type: self.kind(),
            configured: self.configured,
            all_transactions: self.all_transactions(),
            new_transactions: self.new_transactions(),
            invalid_transactions: self.invalid_transactions(),
            random_transaction_requests: self.random_transaction_requests(),
        }
    }
}

// ---------------------------------------------------------------------------
// Neighbor set
// ---------------------------------------------------------------------------

/// Snapshot of the neighbor list.
pub type NeighborList = Arc<Vec<Arc<Neighbor>>>;

/// Copy-on-write neighbor collection.
#[derive(Debug, Default)]
pub struct Neighbors {
    list: RwLock<NeighborList>,
}

impl Neighbors {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current list. Holding it never blocks writers.
    pub fn snapshot(&self) -> NeighborList {
        Arc::clone(&self.list.read())
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Vec<Arc<Neighbor>>) -> R) -> R {
        let mut guard = self.list.write();
        let mut next = guard.as_ref().clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Adds `neighbor` unless one with the same address and transport is
    /// already present.
    pub fn add(&self, neighbor: Arc<Neighbor>) -> bool {
        self.update(|list| {
            let duplicate = list
                .iter()
                .any(|n| n.address() == neighbor.address() && n.kind() == neighbor.kind());
            if !duplicate {
                list.push(neighbor);
            }
            !duplicate
        })
    }

    /// Removes the neighbor at `address` with transport `kind`.
    pub fn remove(&self, address: &SocketAddr, kind: TransportKind) -> bool {
        self.update(|list| {
            let before = list.len();
            list.retain(|n| !(n.address() == *address && n.kind() == kind));
            list.len() != before
        })
    }

    /// Swaps `old` for `new` in one step, keeping its position.
    pub fn replace(&self, old: &Arc<Neighbor>, new: Arc<Neighbor>) -> bool {
        self.update(|list| match list.iter().position(|n| Arc::ptr_eq(n, old)) {
            Some(i) => {
                list[i] = new;
                true
            }
            None => false,
        })
    }

    /// The neighbor a packet from `sender` belongs to.
    pub fn find(&self, sender: &SocketAddr, kind: TransportKind) -> Option<Arc<Neighbor>> {
        self.list
            .read()
            .iter()
            .find(|n| n.matches(sender, kind))
            .cloned()
    }

    pub fn stats(&self) -> Vec<NeighborStats> {
        self.snapshot().iter().map(|n| n.stats()).collect()
    }
}
