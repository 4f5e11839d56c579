//! Peer addresses and the registry of known peers.

use crate::error::ChainError;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A `host:port` pair. Parsing accepts an optional `http://` / `https://`
/// prefix and a trailing `/`, so URLs copied from a browser work too.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ChainError> {
        let host = host.into().trim().to_ascii_lowercase();
        if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ChainError::InvalidPeerAddress(format!("invalid host '{}'", host)));
        }
        if port == 0 {
            return Err(ChainError::InvalidPeerAddress("port must be non-zero".to_string()));
        }
        Ok(PeerAddress { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let without_scheme = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .unwrap_or(trimmed);
        let authority = without_scheme.trim_end_matches('/');

        let (host, port) = authority.rsplit_once(':').ok_or_else(|| {
            ChainError::InvalidPeerAddress(format!("'{}' must be in host:port format", s))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ChainError::InvalidPeerAddress(format!("invalid port in '{}'", s)))?;
        PeerAddress::new(host, port)
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = ChainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(addr: PeerAddress) -> Self {
        addr.to_string()
    }
}

/// Deduplicated set of known peers. The node's own address, when known, is
/// never admitted.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    local: Option<PeerAddress>,
    peers: RwLock<BTreeSet<PeerAddress>>,
}

impl PeerRegistry {
    pub fn new(local: Option<PeerAddress>) -> Self {
        PeerRegistry {
            local,
            peers: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn local(&self) -> Option<&PeerAddress> {
        self.local.as_ref()
    }

    /// Idempotent insert. Returns `true` if the address was new.
    pub fn register(&self, addr: PeerAddress) -> bool {
        if self.local.as_ref() == Some(&addr) {
            return false;
        }
        self.peers.write().insert(addr)
    }

    pub fn register_all<I>(&self, addrs: I) -> usize
    where
        I: IntoIterator<Item = PeerAddress>,
    {
        addrs.into_iter().filter(|a| self.register(a.clone())).count()
    }

    /// Snapshot of known peers in address order.
    pub fn list(&self) -> Vec<PeerAddress> {
        self.peers.read().iter().cloned().collect()
    }

    pub fn contains(&self, addr: &PeerAddress) -> bool {
        self.peers.read().contains(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

/// Parse every address or none: one malformed entry rejects the batch.
pub fn parse_addresses<S: AsRef<str>>(raw: &[S]) -> Result<Vec<PeerAddress>, ChainError> {
    raw.iter().map(|s| s.as_ref().parse()).collect()
}
