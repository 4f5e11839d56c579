use crate::blockchain::{Block, Blockchain, Submission};
use crate::config::Config;
use crate::consensus::{Resolution, Resolver};
use crate::error::ChainError;
use crate::miner::Miner;
use crate::network::{self, query_peers, PeerTransport};
use crate::peers::{parse_addresses, PeerAddress, PeerRegistry};
use crate::transaction::Transaction;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[cfg(feature = "api")]
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
    Degraded,
}

/// What happened to a block announced by a peer.
#[derive(Debug, Clone)]
pub enum BlockOutcome {
    Appended { index: u64 },
    /// The block was ahead of our tail, so a full resolution ran instead.
    Resolved(Resolution),
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub state: NodeState,
    pub chain_length: usize,
    pub pending_transactions: usize,
    pub peers: usize,
    pub blocks_mined: u64,
    pub difficulty: usize,
    pub uptime_seconds: u64,
}

/// One ledger node: the chain and mempool behind a single lock, the peer
/// registry, and the operations every front end (HTTP, tests) calls.
pub struct Node {
    blockchain: Arc<RwLock<Blockchain>>,
    peers: Arc<PeerRegistry>,
    transport: Arc<dyn PeerTransport>,
    miner: Miner,
    resolver: Resolver,
    gossip: bool,
    peer_timeout: Duration,
    state: RwLock<NodeState>,
    blocks_mined: AtomicU64,
    started: Instant,
}

impl Node {
    pub fn new(config: &Config, transport: Arc<dyn PeerTransport>) -> Result<Self, ChainError> {
        let pow = config.proof_of_work()?;
        let local = config.local_address()?;
        let peer_timeout = config.peer_timeout();
        let miner = Miner::new(config.node_id(), config.miner.reward);
        info!(node_id = %miner.node_id(), address = %local, difficulty = pow.difficulty(), "node initialised");

        Ok(Node {
            blockchain: Arc::new(RwLock::new(Blockchain::new(pow))),
            peers: Arc::new(PeerRegistry::new(Some(local))),
            resolver: Resolver::new(Arc::clone(&transport), peer_timeout),
            transport,
            miner,
            gossip: config.network.gossip,
            peer_timeout,
            state: RwLock::new(NodeState::Booting),
            blocks_mined: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    pub fn blockchain(&self) -> &Arc<RwLock<Blockchain>> {
        &self.blockchain
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn node_id(&self) -> &str {
        self.miner.node_id()
    }

    pub fn local_address(&self) -> Option<&PeerAddress> {
        self.peers.local()
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: NodeState) {
        let mut current = self.state.write().await;
        if *current != state {
            info!(from = ?*current, to = ?state, "node state changed");
            *current = state;
        }
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Ledger operations
    // ========================================================================

    /// Mine one block on the current tip and announce it to peers.
    pub async fn mine(&self) -> Result<Block, ChainError> {
        let block = self.miner.mine_block(&self.blockchain).await?;
        self.blocks_mined.fetch_add(1, Ordering::Relaxed);
        if self.gossip {
            network::broadcast_block(self.peers.list(), Arc::clone(&self.transport), block.clone());
        }
        Ok(block)
    }

    /// Validate and queue a transaction. Only transactions new to this node
    /// are forwarded, so gossip between nodes settles.
    pub async fn submit_transaction(
        &self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: f64,
    ) -> Result<Submission, ChainError> {
        let tx = Transaction::new(sender, recipient, amount)?;
        let submission = self.blockchain.write().await.add_transaction(tx.clone());
        if submission.accepted {
            debug!(sender = %tx.sender, recipient = %tx.recipient, amount = tx.amount, "transaction queued");
            if self.gossip {
                network::broadcast_transaction(self.peers.list(), Arc::clone(&self.transport), tx);
            }
        }
        Ok(submission)
    }

    pub async fn chain(&self) -> Vec<Block> {
        self.blockchain.read().await.blocks().to_vec()
    }

    pub async fn pending(&self) -> Vec<Transaction> {
        self.blockchain.read().await.mempool.get_all_transactions()
    }

    /// Handle a block pushed by a peer. A direct successor is appended; a
    /// block further ahead, or one on a competing branch at the next
    /// height, means the sender holds a longer chain and triggers
    /// resolution. Anything at or behind our tail is rejected.
    pub async fn receive_block(&self, block: Block) -> Result<BlockOutcome, ChainError> {
        let tail = {
            let mut bc = self.blockchain.write().await;
            let tail = bc.last_block().clone();
            if block.index == tail.index + 1 && block.previous_hash == tail.hash {
                let index = block.index;
                bc.append(block)?;
                info!(index, "appended announced block");
                return Ok(BlockOutcome::Appended { index });
            }
            tail
        };

        if block.index <= tail.index {
            return Err(ChainError::InvalidBlock(format!(
                "block {} does not extend tail {}",
                block.index, tail.index
            )));
        }
        debug!(announced = block.index, tail = tail.index, "announced block is ahead, resolving");
        Ok(BlockOutcome::Resolved(self.resolve().await))
    }

    // ========================================================================
    // Peer operations
    // ========================================================================

    pub fn list_peers(&self) -> Vec<PeerAddress> {
        self.peers.list()
    }

    /// Register every address or none. Returns how many were new.
    pub fn register_peers<S: AsRef<str>>(&self, raw: &[S]) -> Result<usize, ChainError> {
        let addrs = parse_addresses(raw)?;
        let added = self.peers.register_all(addrs);
        if added > 0 {
            info!(added, total = self.peers.len(), "registered peers");
        }
        Ok(added)
    }

    pub async fn discover(&self) -> usize {
        network::discover(&self.peers, Arc::clone(&self.transport), self.peer_timeout).await
    }

    pub async fn resolve(&self) -> Resolution {
        self.resolver.resolve(&self.blockchain, &self.peers).await
    }

    /// Join the network: register the seeds, announce ourselves to them,
    /// learn their peers, import their pending transactions and adopt the
    /// longest chain on offer. Ends `Ready`, or `Degraded` when seeds were
    /// given but none of them answered.
    pub async fn bootstrap(&self, seeds: &[PeerAddress]) -> Resolution {
        self.set_state(NodeState::Syncing).await;
        self.peers.register_all(seeds.iter().cloned());

        let mut reached = 0;
        if let Some(local) = self.peers.local().cloned() {
            let announced = query_peers(
                seeds.to_vec(),
                Arc::clone(&self.transport),
                self.peer_timeout,
                move |t, peer| {
                    let local = local.clone();
                    async move { t.register_with(&peer, &local).await }
                },
            )
            .await;
            for (peer, outcome) in announced {
                match outcome {
                    Ok(()) => reached += 1,
                    Err(e) => warn!(%peer, error = %e, "could not announce ourselves to seed"),
                }
            }
        }

        let learned = self.discover().await;
        let imported = self.import_pending().await;
        let resolution = self.resolve().await;
        info!(
            peers = self.peers.len(),
            learned,
            imported,
            length = resolution.length,
            replaced = resolution.replaced,
            "bootstrap complete"
        );

        if !seeds.is_empty() && reached == 0 {
            warn!(seeds = seeds.len(), "no seed reachable");
            self.set_state(NodeState::Degraded).await;
        } else {
            self.set_state(NodeState::Ready).await;
        }
        resolution
    }

    async fn import_pending(&self) -> usize {
        let fetched = query_peers(
            self.peers.list(),
            Arc::clone(&self.transport),
            self.peer_timeout,
            |t, peer| async move { t.fetch_pending(&peer).await },
        )
        .await;

        let mut bc = self.blockchain.write().await;
        let mut imported = 0;
        for (peer, outcome) in fetched {
            match outcome {
                Ok(txs) => {
                    for tx in txs {
                        match Transaction::new(tx.sender, tx.recipient, tx.amount) {
                            Ok(tx) => {
                                if bc.add_transaction(tx).accepted {
                                    imported += 1;
                                }
                            }
                            Err(e) => debug!(%peer, error = %e, "skipping malformed pending transaction"),
                        }
                    }
                }
                Err(e) => warn!(%peer, error = %e, "skipping peer during pending import"),
            }
        }
        imported
    }

    pub async fn stats(&self) -> NodeStats {
        let (chain_length, pending_transactions, difficulty) = {
            let bc = self.blockchain.read().await;
            (bc.len(), bc.mempool.len(), bc.proof_of_work().difficulty())
        };
        NodeStats {
            node_id: self.node_id().to_string(),
            state: self.state().await,
            chain_length,
            pending_transactions,
            peers: self.peers.len(),
            blocks_mined: self.blocks_mined(),
            difficulty,
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

/// Install the global tracing subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Start serving, join the network, then log a heartbeat until the server
/// stops. A degraded node retries the bootstrap on every heartbeat.
#[cfg(feature = "api")]
pub async fn run(config: Config) -> Result<(), ChainError> {
    let transport = Arc::new(network::HttpTransport::new(config.peer_timeout())?);
    let node = Arc::new(Node::new(&config, transport)?);
    let seeds = config.bootstrap_peers()?;

    let bind = format!("{}:{}", config.network.host, config.network.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = %bind, "listening");

    let server = tokio::spawn(crate::api::run_api_server(Arc::clone(&node), listener));

    node.bootstrap(&seeds).await;

    let heartbeat_node = Arc::clone(&node);
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if heartbeat_node.state().await == NodeState::Degraded {
                heartbeat_node.bootstrap(&seeds).await;
            }
            let stats = heartbeat_node.stats().await;
            info!(
                chain_length = stats.chain_length,
                pending = stats.pending_transactions,
                peers = stats.peers,
                state = ?stats.state,
                "node running"
            );
        }
    });

    let outcome = server
        .await
        .map_err(|e| ChainError::TaskFailed(e.to_string()))?;
    heartbeat.abort();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// A network where every peer is unreachable.
    struct Offline;

    #[async_trait]
    impl PeerTransport for Offline {
        async fn fetch_chain(&self, peer: &PeerAddress) -> Result<Vec<Block>, ChainError> {
            Err(ChainError::NetworkError(peer.to_string()))
        }
        async fn fetch_peers(&self, peer: &PeerAddress) -> Result<Vec<String>, ChainError> {
            Err(ChainError::NetworkError(peer.to_string()))
        }
        async fn fetch_pending(&self, peer: &PeerAddress) -> Result<Vec<Transaction>, ChainError> {
            Err(ChainError::NetworkError(peer.to_string()))
        }
        async fn announce_block(&self, peer: &PeerAddress, _: &Block) -> Result<(), ChainError> {
            Err(ChainError::NetworkError(peer.to_string()))
        }
        async fn announce_transaction(&self, peer: &PeerAddress, _: &Transaction) -> Result<(), ChainError> {
            Err(ChainError::NetworkError(peer.to_string()))
        }
        async fn register_with(&self, peer: &PeerAddress, _: &PeerAddress) -> Result<(), ChainError> {
            Err(ChainError::NetworkError(peer.to_string()))
        }
    }

    fn node() -> Node {
        let mut config = Config::default();
        config.miner.difficulty = 1;
        config.miner.node_id = Some("node-a".to_string());
        Node::new(&config, Arc::new(Offline)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_then_mine() {
        let node = node();
        let submission = node.submit_transaction("A", "B", 10.0).await.unwrap();
        assert!(submission.accepted);
        assert_eq!(submission.block_index, 1);

        let block = node.mine().await.unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 2);
        assert!(node.pending().await.is_empty());
        assert_eq!(node.blocks_mined(), 1);
    }

    #[tokio::test]
    async fn test_malformed_transaction_never_queued() {
        let node = node();
        assert!(node.submit_transaction("", "B", 1.0).await.is_err());
        assert!(node.submit_transaction("A", "B", -1.0).await.is_err());
        assert!(node.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_is_all_or_nothing_and_excludes_self() {
        let node = node();
        assert!(node.register_peers(&["127.0.0.1:5001", "bogus"]).is_err());
        assert!(node.list_peers().is_empty());

        assert_eq!(node.register_peers(&["127.0.0.1:5001", "127.0.0.1:5000"]).unwrap(), 1);
        assert_eq!(node.list_peers().len(), 1);
    }

    #[tokio::test]
    async fn test_receive_block_appends_successor() {
        let source = node();
        let block = source.mine().await.unwrap();

        let target = node();
        match target.receive_block(block.clone()).await.unwrap() {
            BlockOutcome::Appended { index } => assert_eq!(index, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(target.chain().await, source.chain().await);
        assert!(target.receive_block(block).await.is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_survives_unreachable_seeds() {
        let node = node();
        let seeds = parse_addresses(&["127.0.0.1:5001", "127.0.0.1:5002"]).unwrap();
        let resolution = node.bootstrap(&seeds).await;
        assert!(!resolution.replaced);
        assert_eq!(resolution.length, 1);
        assert_eq!(node.list_peers(), seeds);
        assert_eq!(node.state().await, NodeState::Degraded);
    }

    #[tokio::test]
    async fn test_bootstrap_without_seeds_is_ready() {
        let node = node();
        node.bootstrap(&[]).await;
        assert_eq!(node.state().await, NodeState::Ready);
    }

    #[tokio::test]
    async fn test_bootstrap_ready_when_a_seed_answers() {
        use crate::network::test_support::ScriptedTransport;

        let seed = PeerAddress::new("127.0.0.1", 5001).unwrap();
        let offline = node();
        offline.bootstrap(std::slice::from_ref(&seed)).await;
        assert_eq!(offline.state().await, NodeState::Degraded);

        let mut config = Config::default();
        config.miner.difficulty = 1;
        let transport = ScriptedTransport::default().with_chain(&seed, offline.chain().await);
        let online = Node::new(&config, Arc::new(transport)).unwrap();
        online.bootstrap(std::slice::from_ref(&seed)).await;
        assert_eq!(online.state().await, NodeState::Ready);
    }
}
