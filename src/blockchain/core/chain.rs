use crate::error::ChainError;
use crate::hasher::{self, Canonical, HashHex};
use crate::mempool::Mempool;
use crate::miner::ProofOfWork;
use crate::transaction::Transaction;
use serde_json::{json, Value};
use std::collections::HashSet;

use super::validation::{validate_chain, validate_successor};

pub const GENESIS_TIMESTAMP: u64 = 1_234_567_890_000;
pub const GENESIS_NONCE: u64 = 100;
pub const GENESIS_PREVIOUS_HASH: &str = "1";

/// An immutable link in the chain. `hash` covers every other field.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub previous_hash: HashHex,
    pub hash: HashHex,
}

impl Block {
    pub fn new(
        index: u64,
        timestamp: u64,
        transactions: Vec<Transaction>,
        nonce: u64,
        previous_hash: HashHex,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            nonce,
            previous_hash,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The fixed first block shared by every node.
    pub fn genesis() -> Self {
        Block::new(
            0,
            GENESIS_TIMESTAMP,
            Vec::new(),
            GENESIS_NONCE,
            GENESIS_PREVIOUS_HASH.to_string(),
        )
    }

    pub fn calculate_hash(&self) -> HashHex {
        hasher::digest(self)
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}

impl Canonical for Block {
    fn canonical_value(&self) -> Value {
        let transactions: Vec<Value> = self
            .transactions
            .iter()
            .map(Canonical::canonical_value)
            .collect();
        json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "transactions": transactions,
            "nonce": self.nonce,
            "previous_hash": self.previous_hash,
        })
    }
}

/// Digest over a whole block sequence. Two nodes agree on their chains
/// exactly when their fingerprints match.
pub fn chain_fingerprint(blocks: &[Block]) -> HashHex {
    let hashes: Vec<Value> = blocks.iter().map(|b| Value::String(b.hash.clone())).collect();
    hasher::digest(&Value::Array(hashes))
}

/// Result of queueing a transaction: whether it was new to this node, and
/// the index of the block it is expected to land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub accepted: bool,
    pub block_index: u64,
}

/// The node's ledger: the block sequence plus the pool of pending
/// transactions. Callers share it as `Arc<RwLock<Blockchain>>`.
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    pub mempool: Mempool,
    pow: ProofOfWork,
    /// Ids of every transaction already in a block.
    confirmed: HashSet<HashHex>,
}

fn confirmed_ids(blocks: &[Block]) -> HashSet<HashHex> {
    blocks
        .iter()
        .flat_map(|b| b.transactions.iter())
        .filter(|tx| !tx.is_reward())
        .map(Transaction::id)
        .collect()
}

impl Blockchain {
    /// Create a chain holding only the genesis block.
    pub fn new(pow: ProofOfWork) -> Self {
        Blockchain {
            blocks: vec![Block::genesis()],
            mempool: Mempool::new(),
            pow,
            confirmed: HashSet::new(),
        }
    }

    /// Adopt an existing block sequence after validating it.
    pub fn from_blocks(blocks: Vec<Block>, pow: ProofOfWork) -> Result<Self, ChainError> {
        validate_chain(&blocks, &pow)?;
        Ok(Blockchain {
            confirmed: confirmed_ids(&blocks),
            blocks,
            mempool: Mempool::new(),
            pow,
        })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn last_block(&self) -> &Block {
        // never empty: every constructor starts from a validated genesis
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn proof_of_work(&self) -> ProofOfWork {
        self.pow
    }

    pub fn is_valid(&self, chain: &[Block]) -> bool {
        validate_chain(chain, &self.pow).is_ok()
    }

    pub fn is_confirmed(&self, tx: &Transaction) -> bool {
        self.confirmed.contains(&tx.id())
    }

    /// Queue an already validated transaction for the next block. Copies of
    /// a transaction that is pending or already in a block are not accepted.
    pub fn add_transaction(&mut self, tx: Transaction) -> Submission {
        let accepted = !self.is_confirmed(&tx) && self.mempool.add_transaction(tx);
        Submission {
            accepted,
            block_index: self.last_block().index + 1,
        }
    }

    /// Extend the tail with one block, pruning its transactions from the pool.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        validate_successor(self.last_block(), &block, &self.pow)?;
        self.mempool.remove_confirmed(&block.transactions);
        self.confirmed.extend(
            block
                .transactions
                .iter()
                .filter(|tx| !tx.is_reward())
                .map(Transaction::id),
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Assemble and append the block for a nonce found against the current
    /// tail: reward first, then every pending transaction.
    pub fn forge_block(&mut self, nonce: u64, reward: Transaction) -> Result<Block, ChainError> {
        let last = self.last_block();
        // a nonce found against an older tail no longer satisfies the proof
        if !self.pow.valid_proof(last.nonce, nonce, &last.hash) {
            return Err(ChainError::StaleTip);
        }
        let index = last.index + 1;
        let previous_hash = last.hash.clone();
        let timestamp = (chrono::Utc::now().timestamp_millis().max(0) as u64).max(last.timestamp);

        let mut transactions = vec![reward];
        transactions.extend(self.mempool.drain().into_iter().map(Transaction::confirmed));

        let block = Block::new(index, timestamp, transactions, nonce, previous_hash);
        if let Err(e) = self.append(block.clone()) {
            self.mempool.requeue(block.transactions);
            return Err(e);
        }
        Ok(block)
    }

    /// Swap in a strictly longer valid chain. Transactions from discarded
    /// local blocks that the new chain lacks go back to the pool; pending
    /// transactions the new chain confirms are dropped. Returns how many
    /// transactions were requeued.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<usize, ChainError> {
        if candidate.len() <= self.blocks.len() {
            return Err(ChainError::ChainNotLonger {
                candidate: candidate.len(),
                local: self.blocks.len(),
            });
        }
        validate_chain(&candidate, &self.pow)?;

        let fork = self
            .blocks
            .iter()
            .zip(candidate.iter())
            .take_while(|(ours, theirs)| ours.hash == theirs.hash)
            .count();

        let adopted: HashSet<HashHex> = candidate[fork..]
            .iter()
            .flat_map(|b| b.transactions.iter().map(Transaction::id))
            .collect();
        let orphaned: Vec<Transaction> = self.blocks[fork..]
            .iter()
            .flat_map(|b| b.transactions.iter().cloned())
            .filter(|tx| !adopted.contains(&tx.id()))
            .collect();

        self.blocks = candidate;
        self.confirmed = confirmed_ids(&self.blocks);
        self.mempool
            .remove_confirmed(self.blocks[fork..].iter().flat_map(|b| b.transactions.iter()));
        let orphaned: Vec<Transaction> = orphaned
            .into_iter()
            .filter(|tx| !self.confirmed.contains(&tx.id()))
            .collect();
        Ok(self.mempool.requeue(orphaned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxStatus;

    fn easy() -> ProofOfWork {
        ProofOfWork::new(1).unwrap()
    }

    fn mine_next(chain: &mut Blockchain, miner: &str) -> Block {
        let last = chain.last_block().clone();
        let nonce = chain.proof_of_work().mine(last.nonce, &last.hash);
        chain.forge_block(nonce, Transaction::reward(miner, 1.0)).unwrap()
    }

    #[test]
    fn test_genesis_is_fixed() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a, b);
        assert_eq!(a.index, 0);
        assert!(a.transactions.is_empty());
        assert_eq!(a.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(a.has_valid_hash());
        assert_eq!(Blockchain::new(easy()).blocks(), &[a]);
    }

    #[test]
    fn test_mine_after_transaction() {
        let mut chain = Blockchain::new(easy());
        let submission = chain.add_transaction(Transaction::new("A", "B", 10.0).unwrap());
        assert!(submission.accepted);
        assert_eq!(submission.block_index, 1);

        let block = mine_next(&mut chain, "node-x");

        assert_eq!(chain.len(), 2);
        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, Block::genesis().hash);
        assert_eq!(block.transactions.len(), 2);
        assert!(block.transactions[0].is_reward());
        assert_eq!(block.transactions[0].recipient, "node-x");
        assert_eq!(block.transactions[1].sender, "A");
        assert_eq!(block.transactions[1].status, TxStatus::Success);
        assert!(chain.mempool.is_empty());
        assert!(chain.is_valid(chain.blocks()));
    }

    #[test]
    fn test_append_rejects_wrong_previous_hash() {
        let mut chain = Blockchain::new(easy());
        let genesis = Block::genesis();
        let nonce = easy().mine(genesis.nonce, &genesis.hash);
        let block = Block::new(1, 1, vec![], nonce, "f".repeat(64));

        assert!(matches!(chain.append(block), Err(ChainError::InvalidBlock(_))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_rejects_unmet_proof() {
        let pow = ProofOfWork::new(2).unwrap();
        let mut chain = Blockchain::new(pow);
        let genesis = Block::genesis();
        let bad_nonce = (0..)
            .find(|n| !pow.valid_proof(genesis.nonce, *n, &genesis.hash))
            .unwrap();
        let block = Block::new(1, 1, vec![], bad_nonce, genesis.hash.clone());

        assert!(matches!(
            chain.append(block),
            Err(ChainError::InvalidProofOfWork { index: 1 })
        ));
    }

    #[test]
    fn test_append_prunes_confirmed_transactions() {
        let mut source = Blockchain::new(easy());
        source.add_transaction(Transaction::new("A", "B", 1.0).unwrap());
        let block = mine_next(&mut source, "miner");

        let mut follower = Blockchain::new(easy());
        follower.add_transaction(Transaction::new("A", "B", 1.0).unwrap());
        follower.add_transaction(Transaction::new("C", "D", 2.0).unwrap());
        follower.append(block).unwrap();

        assert_eq!(follower.mempool.len(), 1);
        assert_eq!(follower.mempool.get_all_transactions()[0].sender, "C");
    }

    #[test]
    fn test_forge_with_stale_nonce_keeps_pool() {
        let pow = ProofOfWork::new(2).unwrap();
        let mut chain = Blockchain::new(pow);
        chain.add_transaction(Transaction::new("A", "B", 1.0).unwrap());
        let genesis = Block::genesis();
        let bad_nonce = (0..)
            .find(|n| !pow.valid_proof(genesis.nonce, *n, &genesis.hash))
            .unwrap();

        assert!(matches!(
            chain.forge_block(bad_nonce, Transaction::reward("m", 1.0)),
            Err(ChainError::StaleTip)
        ));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.mempool.len(), 1);
    }

    #[test]
    fn test_replace_requires_longer_chain() {
        let mut ours = Blockchain::new(easy());
        mine_next(&mut ours, "us");
        let mut theirs = Blockchain::new(easy());
        mine_next(&mut theirs, "them");

        let err = ours.replace_chain(theirs.blocks().to_vec()).unwrap_err();
        assert!(matches!(err, ChainError::ChainNotLonger { candidate: 2, local: 2 }));
        assert_eq!(ours.last_block().transactions[0].recipient, "us");
    }

    #[test]
    fn test_replace_rejects_invalid_longer_chain() {
        let mut ours = Blockchain::new(easy());
        let mut theirs = Blockchain::new(easy());
        mine_next(&mut theirs, "them");
        mine_next(&mut theirs, "them");

        let mut forged = theirs.blocks().to_vec();
        forged[1].transactions[0].amount = 1000.0;

        assert!(ours.replace_chain(forged).is_err());
        assert_eq!(ours.len(), 1);
    }

    #[test]
    fn test_replace_requeues_orphaned_transactions() {
        let mut ours = Blockchain::new(easy());
        ours.add_transaction(Transaction::new("A", "B", 5.0).unwrap());
        ours.add_transaction(Transaction::new("C", "D", 6.0).unwrap());
        mine_next(&mut ours, "us");

        let mut theirs = Blockchain::new(easy());
        theirs.add_transaction(Transaction::new("C", "D", 6.0).unwrap());
        mine_next(&mut theirs, "them");
        mine_next(&mut theirs, "them");

        let requeued = ours.replace_chain(theirs.blocks().to_vec()).unwrap();

        assert_eq!(requeued, 1);
        assert_eq!(ours.len(), 3);
        let pending = ours.mempool.get_all_transactions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender, "A");
        assert_eq!(pending[0].status, TxStatus::Pending);
    }

    #[test]
    fn test_from_blocks_validates() {
        let mut chain = Blockchain::new(easy());
        mine_next(&mut chain, "m");
        assert!(Blockchain::from_blocks(chain.blocks().to_vec(), easy()).is_ok());
        assert!(Blockchain::from_blocks(chain.blocks()[1..].to_vec(), easy()).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_chain_content() {
        let mut a = Blockchain::new(easy());
        let b = Blockchain::new(easy());
        assert_eq!(chain_fingerprint(a.blocks()), chain_fingerprint(b.blocks()));
        mine_next(&mut a, "m");
        assert_ne!(chain_fingerprint(a.blocks()), chain_fingerprint(b.blocks()));
        assert_eq!(chain_fingerprint(a.blocks()).len(), 64);
    }

    #[test]
    fn test_confirmed_transaction_not_accepted_again() {
        let mut source = Blockchain::new(easy());
        source.add_transaction(Transaction::new("alice", "bob", 3.0).unwrap());
        let block = mine_next(&mut source, "x");

        // a copy arriving after the block must not be queued again
        let mut follower = Blockchain::new(easy());
        follower.append(block).unwrap();
        let late = follower.add_transaction(Transaction::new("alice", "bob", 3.0).unwrap());
        assert!(!late.accepted);
        assert!(follower.mempool.is_empty());

        let again = source.add_transaction(Transaction::new("alice", "bob", 3.0).unwrap());
        assert!(!again.accepted);
        mine_next(&mut source, "x");
        let occurrences = source
            .blocks()
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| tx.sender == "alice")
            .count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn test_replacement_resets_confirmed_set() {
        let mut ours = Blockchain::new(easy());
        ours.add_transaction(Transaction::new("alice", "bob", 3.0).unwrap());
        mine_next(&mut ours, "us");

        let mut theirs = Blockchain::new(easy());
        mine_next(&mut theirs, "them");
        mine_next(&mut theirs, "them");

        ours.replace_chain(theirs.blocks().to_vec()).unwrap();
        let orphan = Transaction::new("alice", "bob", 3.0).unwrap();
        assert!(!ours.is_confirmed(&orphan));
        assert!(ours.mempool.contains(&orphan));
    }
}
