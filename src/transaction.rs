//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::validate_fields;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;

    #[test]
    fn test_new_transaction_is_pending() {
        let tx = Transaction::new("alice", "bob", 10.0).unwrap();
        assert_eq!(tx.status, TxStatus::Pending);
        assert!(!tx.is_reward());
    }

    #[test]
    fn test_empty_parties_rejected() {
        assert!(matches!(
            Transaction::new("", "bob", 1.0),
            Err(ChainError::InvalidTransaction(_))
        ));
        assert!(matches!(
            Transaction::new("alice", "   ", 1.0),
            Err(ChainError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_negative_and_non_finite_amounts_rejected() {
        assert!(Transaction::new("alice", "bob", -0.5).is_err());
        assert!(Transaction::new("alice", "bob", f64::NAN).is_err());
        assert!(Transaction::new("alice", "bob", f64::INFINITY).is_err());
        assert!(Transaction::new("alice", "bob", 0.0).is_ok());
    }

    #[test]
    fn test_reward_sender_reserved() {
        assert!(Transaction::new(REWARD_SENDER, "bob", 1.0).is_err());
        let reward = Transaction::reward("node-1", 1.0);
        assert!(reward.is_reward());
        assert_eq!(reward.status, TxStatus::Success);
    }

    #[test]
    fn test_id_ignores_status() {
        let pending = Transaction::new("alice", "bob", 3.25).unwrap();
        let confirmed = pending.clone().confirmed();
        assert_eq!(confirmed.status, TxStatus::Success);
        assert_eq!(pending.id(), confirmed.id());
        assert_ne!(pending.id(), Transaction::new("alice", "bob", 3.5).unwrap().id());
    }

    #[test]
    fn test_status_wire_format() {
        let tx = Transaction::new("a", "b", 1.0).unwrap();
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["status"], "pending");
        let parsed: Transaction =
            serde_json::from_str(r#"{"sender":"a","recipient":"b","amount":2}"#).unwrap();
        assert_eq!(parsed.status, TxStatus::Pending);
        assert_eq!(parsed.amount, 2.0);
    }
}
