use super::types::{Transaction, REWARD_SENDER};
use crate::error::ChainError;

/// Boundary check for externally submitted transactions. No balance or
/// double-spend checks happen here.
pub fn validate_fields(tx: &Transaction) -> Result<(), ChainError> {
    if tx.sender.trim().is_empty() {
        return Err(ChainError::InvalidTransaction("sender must not be empty".to_string()));
    }
    if tx.recipient.trim().is_empty() {
        return Err(ChainError::InvalidTransaction("recipient must not be empty".to_string()));
    }
    if tx.sender == REWARD_SENDER {
        return Err(ChainError::InvalidTransaction(format!(
            "sender '{}' is reserved for block rewards",
            REWARD_SENDER
        )));
    }
    if !tx.amount.is_finite() || tx.amount < 0.0 {
        return Err(ChainError::InvalidTransaction(format!(
            "amount must be a non-negative number, got {}",
            tx.amount
        )));
    }
    Ok(())
}
