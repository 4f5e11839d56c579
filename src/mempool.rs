//! Pending transaction pool.
//!
//! The pool is owned by the [`Blockchain`](crate::blockchain::Blockchain) and
//! shares its lock, so `drain` and `add_transaction` never interleave: a
//! transaction is either in the drained snapshot or still pending, never both.

use crate::hasher::HashHex;
use crate::transaction::Transaction;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    pending: Vec<Transaction>,
    ids: HashSet<HashHex>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transaction in `pending` state. Returns `false` when an
    /// identical transaction is already waiting.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        if !self.ids.insert(tx.id()) {
            return false;
        }
        self.pending.push(tx.pending());
        true
    }

    /// Remove and return everything currently pending, in arrival order.
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.ids.clear();
        std::mem::take(&mut self.pending)
    }

    /// Drop pending entries that now appear in a block. Returns how many were removed.
    pub fn remove_confirmed<'a, I>(&mut self, confirmed: I) -> usize
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let confirmed: HashSet<HashHex> = confirmed.into_iter().map(Transaction::id).collect();
        let before = self.pending.len();
        self.pending.retain(|tx| !confirmed.contains(&tx.id()));
        self.ids.retain(|id| !confirmed.contains(id));
        before - self.pending.len()
    }

    /// Put transactions back into the pool, skipping rewards and duplicates.
    pub fn requeue<I>(&mut self, txs: I) -> usize
    where
        I: IntoIterator<Item = Transaction>,
    {
        txs.into_iter()
            .filter(|tx| !tx.is_reward())
            .map(|tx| self.add_transaction(tx))
            .filter(|added| *added)
            .count()
    }

    pub fn get_all_transactions(&self) -> Vec<Transaction> {
        self.pending.clone()
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.ids.contains(&tx.id())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
