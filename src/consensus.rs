//! Longest-valid-chain consensus.
//!
//! Resolution fetches every known peer's chain, keeps the ones that are both
//! valid and strictly longer than ours, and adopts the longest. Among equally
//! long candidates the one whose tail hash sorts lowest wins, so the outcome
//! does not depend on which peer answered first.

use crate::blockchain::{validate_chain, Block, Blockchain};
use crate::miner::ProofOfWork;
use crate::network::{query_peers, PeerTransport};
use crate::peers::{PeerAddress, PeerRegistry};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A chain offered by a peer.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub peer: PeerAddress,
    pub blocks: Vec<Block>,
}

impl Candidate {
    fn tail_hash(&self) -> &str {
        self.blocks.last().map(|b| b.hash.as_str()).unwrap_or("")
    }

    /// `Less` means `self` is preferred.
    fn preference(&self, other: &Candidate) -> Ordering {
        other
            .blocks
            .len()
            .cmp(&self.blocks.len())
            .then_with(|| self.tail_hash().cmp(other.tail_hash()))
    }
}

/// Pure candidate selection.
pub struct Consensus;

impl Consensus {
    /// Pick the chain to adopt, if any, given the local length.
    pub fn select_canonical(
        local_len: usize,
        candidates: Vec<Candidate>,
        pow: &ProofOfWork,
    ) -> Option<Candidate> {
        candidates
            .into_iter()
            .filter(|c| c.blocks.len() > local_len)
            .filter(|c| match validate_chain(&c.blocks, pow) {
                Ok(()) => true,
                Err(e) => {
                    warn!(peer = %c.peer, length = c.blocks.len(), error = %e, "rejecting invalid chain");
                    false
                }
            })
            .min_by(|a, b| a.preference(b))
    }
}

/// Outcome of one resolution round.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub replaced: bool,
    pub source: Option<PeerAddress>,
    pub length: usize,
    pub requeued: usize,
}

/// Runs resolution rounds against the peers in a registry.
#[derive(Clone)]
pub struct Resolver {
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(transport: Arc<dyn PeerTransport>, timeout: Duration) -> Self {
        Resolver { transport, timeout }
    }

    /// Never shortens the local chain and never adopts an invalid one. Peer
    /// failures are logged and skipped.
    pub async fn resolve(&self, blockchain: &Arc<RwLock<Blockchain>>, registry: &PeerRegistry) -> Resolution {
        let (local_len, pow) = {
            let bc = blockchain.read().await;
            (bc.len(), bc.proof_of_work())
        };

        let fetched = query_peers(
            registry.list(),
            Arc::clone(&self.transport),
            self.timeout,
            |t, peer| async move { t.fetch_chain(&peer).await },
        )
        .await;

        let candidates: Vec<Candidate> = fetched
            .into_iter()
            .filter_map(|(peer, outcome)| match outcome {
                Ok(blocks) => {
                    debug!(%peer, length = blocks.len(), "fetched chain");
                    Some(Candidate { peer, blocks })
                }
                Err(e) => {
                    warn!(%peer, error = %e, "skipping peer during resolution");
                    None
                }
            })
            .collect();

        // full-chain validation is CPU bound; keep it off the async workers
        let selected =
            tokio::task::spawn_blocking(move || Consensus::select_canonical(local_len, candidates, &pow)).await;
        let best = match selected {
            Ok(best) => best,
            Err(e) => {
                warn!(error = %e, "chain selection task failed");
                None
            }
        };
        let Some(best) = best else {
            return Resolution {
                replaced: false,
                source: None,
                length: local_len,
                requeued: 0,
            };
        };

        // the local chain may have grown while peers were being queried;
        // replace_chain re-checks length and validity under the write lock
        let mut bc = blockchain.write().await;
        match bc.replace_chain(best.blocks) {
            Ok(requeued) => {
                info!(peer = %best.peer, length = bc.len(), requeued, "adopted longer chain");
                Resolution {
                    replaced: true,
                    source: Some(best.peer),
                    length: bc.len(),
                    requeued,
                }
            }
            Err(e) => {
                info!(peer = %best.peer, error = %e, "kept local chain");
                Resolution {
                    replaced: false,
                    source: None,
                    length: bc.len(),
                    requeued: 0,
                }
            }
        }
    }
}
