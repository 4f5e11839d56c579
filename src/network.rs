//! Peer-to-peer exchange over the same HTTP surface the node serves.
//!
//! [`PeerTransport`] is the seam between the ledger logic and the wire: the
//! node only talks to peers through it, so tests can swap in an in-process
//! network.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::peers::{PeerAddress, PeerRegistry};
use crate::transaction::Transaction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResponse {
    pub chain: Vec<Block>,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingResponse {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransactionRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
}

impl From<&Transaction> for NewTransactionRequest {
    fn from(tx: &Transaction) -> Self {
        NewTransactionRequest {
            sender: tx.sender.clone(),
            recipient: tx.recipient.clone(),
            amount: tx.amount,
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Full chain as served by the peer's `GET /chain`.
    async fn fetch_chain(&self, peer: &PeerAddress) -> Result<Vec<Block>, ChainError>;
    /// Raw peer list from `GET /nodes/list`; entries are parsed by the caller.
    async fn fetch_peers(&self, peer: &PeerAddress) -> Result<Vec<String>, ChainError>;
    async fn fetch_pending(&self, peer: &PeerAddress) -> Result<Vec<Transaction>, ChainError>;
    async fn announce_block(&self, peer: &PeerAddress, block: &Block) -> Result<(), ChainError>;
    async fn announce_transaction(&self, peer: &PeerAddress, tx: &Transaction) -> Result<(), ChainError>;
    /// Ask `peer` to add `local` to its registry.
    async fn register_with(&self, peer: &PeerAddress, local: &PeerAddress) -> Result<(), ChainError>;
}

/// `PeerTransport` over HTTP with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(2)))
            .build()?;
        Ok(HttpTransport { client })
    }

    fn url(peer: &PeerAddress, path: &str) -> String {
        format!("{}{}", peer.base_url(), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        peer: &PeerAddress,
        path: &str,
    ) -> Result<T, ChainError> {
        let response = self
            .client
            .get(Self::url(peer, path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        peer: &PeerAddress,
        path: &str,
        body: &B,
    ) -> Result<(), ChainError> {
        self.client
            .post(Self::url(peer, path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn fetch_chain(&self, peer: &PeerAddress) -> Result<Vec<Block>, ChainError> {
        let response: ChainResponse = self.get_json(peer, "/chain").await?;
        if response.length != response.chain.len() {
            return Err(ChainError::MalformedResponse(format!(
                "{} reported length {} but sent {} blocks",
                peer,
                response.length,
                response.chain.len()
            )));
        }
        Ok(response.chain)
    }

    async fn fetch_peers(&self, peer: &PeerAddress) -> Result<Vec<String>, ChainError> {
        let response: NodesResponse = self.get_json(peer, "/nodes/list").await?;
        Ok(response.nodes)
    }

    async fn fetch_pending(&self, peer: &PeerAddress) -> Result<Vec<Transaction>, ChainError> {
        let response: PendingResponse = self.get_json(peer, "/transactions/pending").await?;
        Ok(response.transactions)
    }

    async fn announce_block(&self, peer: &PeerAddress, block: &Block) -> Result<(), ChainError> {
        self.post_json(peer, "/blocks/new", block).await
    }

    async fn announce_transaction(&self, peer: &PeerAddress, tx: &Transaction) -> Result<(), ChainError> {
        self.post_json(peer, "/transactions/new", &NewTransactionRequest::from(tx))
            .await
    }

    async fn register_with(&self, peer: &PeerAddress, local: &PeerAddress) -> Result<(), ChainError> {
        let body = RegisterRequest {
            nodes: vec![local.to_string()],
        };
        self.post_json(peer, "/nodes/register", &body).await
    }
}

// ============================================================================
// Fan-out helpers
// ============================================================================

/// Run `query` against every peer concurrently. Each query is bounded by
/// `timeout`; a peer that overruns it yields `PeerTimeout`. Results come back
/// sorted by peer address.
pub async fn query_peers<T, F, Fut>(
    peers: Vec<PeerAddress>,
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    query: F,
) -> Vec<(PeerAddress, Result<T, ChainError>)>
where
    T: Send + 'static,
    F: Fn(Arc<dyn PeerTransport>, PeerAddress) -> Fut,
    Fut: Future<Output = Result<T, ChainError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for peer in peers {
        let pending = query(Arc::clone(&transport), peer.clone());
        tasks.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, pending).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ChainError::PeerTimeout(peer.to_string())),
            };
            (peer, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "peer query task failed"),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Ask every known peer for its peer list and merge the answers into
/// `registry`. Unreachable peers and malformed entries are skipped. Returns
/// the number of newly learned addresses.
pub async fn discover(
    registry: &PeerRegistry,
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
) -> usize {
    let responses = query_peers(registry.list(), transport, timeout, |t, peer| async move {
        t.fetch_peers(&peer).await
    })
    .await;

    let mut added = 0;
    for (peer, outcome) in responses {
        match outcome {
            Ok(entries) => {
                for entry in entries {
                    match entry.parse::<PeerAddress>() {
                        Ok(addr) => {
                            if registry.register(addr.clone()) {
                                debug!(%peer, learned = %addr, "discovered peer");
                                added += 1;
                            }
                        }
                        Err(e) => warn!(%peer, entry = %entry, error = %e, "ignoring malformed peer entry"),
                    }
                }
            }
            Err(e) => warn!(%peer, error = %e, "skipping peer during discovery"),
        }
    }
    added
}

/// Announce a block to every peer in the background. Failures are logged only.
pub fn broadcast_block(peers: Vec<PeerAddress>, transport: Arc<dyn PeerTransport>, block: Block) {
    for peer in peers {
        let transport = Arc::clone(&transport);
        let block = block.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.announce_block(&peer, &block).await {
                debug!(%peer, index = block.index, error = %e, "block announcement failed");
            }
        });
    }
}

/// Announce a transaction to every peer in the background.
pub fn broadcast_transaction(
    peers: Vec<PeerAddress>,
    transport: Arc<dyn PeerTransport>,
    tx: Transaction,
) {
    for peer in peers {
        let transport = Arc::clone(&transport);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.announce_transaction(&peer, &tx).await {
                debug!(%peer, error = %e, "transaction announcement failed");
            }
        });
    }
}
