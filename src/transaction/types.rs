/// Transaction types for PeerChain
use crate::error::ChainError;
use crate::hasher::{self, Canonical, HashHex};
use serde_json::{json, Value};

/// Sender used by block rewards; never accepted from outside.
pub const REWARD_SENDER: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    #[default]
    Pending,
    Success,
}

/// A value transfer between two identifiers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    #[serde(default)]
    pub status: TxStatus,
}

impl Transaction {
    /// Build a pending transaction, rejecting malformed fields.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: f64,
    ) -> Result<Self, ChainError> {
        let tx = Transaction {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            status: TxStatus::Pending,
        };
        super::validation::validate_fields(&tx)?;
        Ok(tx)
    }

    /// The reward credited to a miner, already confirmed.
    pub fn reward(recipient: impl Into<String>, amount: f64) -> Self {
        Transaction {
            sender: REWARD_SENDER.to_string(),
            recipient: recipient.into(),
            amount,
            status: TxStatus::Success,
        }
    }

    pub fn is_reward(&self) -> bool {
        self.sender == REWARD_SENDER
    }

    pub fn confirmed(mut self) -> Self {
        self.status = TxStatus::Success;
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = TxStatus::Pending;
        self
    }

    /// Identity used for dedup and confirmation; `status` is excluded.
    pub fn id(&self) -> HashHex {
        hasher::digest(&json!({
            "sender": self.sender,
            "recipient": self.recipient,
            "amount": self.amount,
        }))
    }
}

impl Canonical for Transaction {
    fn canonical_value(&self) -> Value {
        json!({
            "sender": self.sender,
            "recipient": self.recipient,
            "amount": self.amount,
            "status": self.status,
        })
    }
}
