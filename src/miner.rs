//! Proof-of-work mining.
//!
//! The predicate ties each block to its predecessor: a nonce is accepted when
//! `sha256("{prev_nonce}{nonce}{prev_hash}")` starts with `difficulty` zero
//! hex characters. The search itself runs on the blocking pool without any
//! chain lock held; the lock is only taken for the final append.

use crate::blockchain::{Block, Blockchain};
use crate::error::ChainError;
use crate::hasher::sha256_hex;
use crate::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEFAULT_DIFFICULTY: usize = 4;
pub const MAX_DIFFICULTY: usize = 64;

/// How many candidates are tried between checks for a moved tip.
const STALE_CHECK_INTERVAL: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: usize,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        ProofOfWork {
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

impl ProofOfWork {
    pub fn new(difficulty: usize) -> Result<Self, ChainError> {
        if difficulty == 0 || difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "difficulty must be between 1 and {}, got {}",
                MAX_DIFFICULTY, difficulty
            )));
        }
        Ok(ProofOfWork { difficulty })
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn proof_digest(prev_nonce: u64, nonce: u64, prev_hash: &str) -> String {
        sha256_hex(format!("{}{}{}", prev_nonce, nonce, prev_hash).as_bytes())
    }

    pub fn valid_proof(&self, prev_nonce: u64, nonce: u64, prev_hash: &str) -> bool {
        Self::proof_digest(prev_nonce, nonce, prev_hash)
            .bytes()
            .take(self.difficulty)
            .all(|b| b == b'0')
    }

    /// Unbounded search from nonce 0. Deterministic for identical inputs.
    pub fn mine(&self, prev_nonce: u64, prev_hash: &str) -> u64 {
        let mut nonce = 0u64;
        while !self.valid_proof(prev_nonce, nonce, prev_hash) {
            nonce = nonce.wrapping_add(1);
        }
        nonce
    }

    /// Same search, abandoned with `None` once `is_stale` reports that the
    /// tip being mined on has been replaced.
    pub fn mine_until<F>(&self, prev_nonce: u64, prev_hash: &str, is_stale: F) -> Option<u64>
    where
        F: Fn() -> bool,
    {
        let mut nonce = 0u64;
        loop {
            if nonce % STALE_CHECK_INTERVAL == 0 && nonce > 0 && is_stale() {
                return None;
            }
            if self.valid_proof(prev_nonce, nonce, prev_hash) {
                return Some(nonce);
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}

/// Mines blocks for one node identity.
#[derive(Debug, Clone)]
pub struct Miner {
    node_id: String,
    reward: f64,
}

impl Miner {
    pub fn new(node_id: impl Into<String>, reward: f64) -> Self {
        Miner {
            node_id: node_id.into(),
            reward,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Find a nonce for the current tip and append the resulting block.
    /// If another writer moves the tip first, the search restarts on the
    /// new tip instead of failing.
    pub async fn mine_block(&self, blockchain: &Arc<RwLock<Blockchain>>) -> Result<Block, ChainError> {
        loop {
            let (pow, prev_nonce, prev_hash) = {
                let bc = blockchain.read().await;
                let last = bc.last_block();
                (bc.proof_of_work(), last.nonce, last.hash.clone())
            };

            let watched = Arc::clone(blockchain);
            let tip = prev_hash.clone();
            let found = tokio::task::spawn_blocking(move || {
                pow.mine_until(prev_nonce, &tip, || tip_moved(&watched, &tip))
            })
            .await
            .map_err(|e| ChainError::TaskFailed(e.to_string()))?;

            let Some(nonce) = found else {
                debug!(tip = %prev_hash, "tip moved during search, restarting");
                continue;
            };

            let mut bc = blockchain.write().await;
            if bc.last_block().hash != prev_hash {
                debug!(tip = %prev_hash, "lost append race, restarting");
                continue;
            }
            let block = bc.forge_block(nonce, Transaction::reward(&self.node_id, self.reward))?;
            info!(
                index = block.index,
                nonce = block.nonce,
                transactions = block.transactions.len(),
                hash = %block.hash,
                "mined block"
            );
            return Ok(block);
        }
    }
}

fn tip_moved(blockchain: &RwLock<Blockchain>, tip: &str) -> bool {
    blockchain
        .try_read()
        .map(|bc| bc.last_block().hash != tip)
        .unwrap_or(false)
}
