//! Error types for PeerChain

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid peer address: {0}")]
    InvalidPeerAddress(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid proof of work for block {index}")]
    InvalidProofOfWork { index: u64 },
    #[error("Chain does not start with the genesis block")]
    InvalidGenesis,
    #[error("Candidate chain of length {candidate} is not longer than local chain of length {local}")]
    ChainNotLonger { candidate: usize, local: usize },
    #[error("Chain tip changed while mining")]
    StaleTip,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Peer {0} did not respond in time")]
    PeerTimeout(String),
    #[error("Malformed response from peer: {0}")]
    MalformedResponse(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Background task failed: {0}")]
    TaskFailed(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ChainError {
    /// Validation failures leave local state untouched and are reported to the
    /// caller as conflicts rather than bad requests.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidBlock(_)
                | ChainError::InvalidProofOfWork { .. }
                | ChainError::InvalidGenesis
                | ChainError::ChainNotLonger { .. }
                | ChainError::StaleTip
        )
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChainError::PeerTimeout(err.url().map(|u| u.to_string()).unwrap_or_default())
        } else if err.is_decode() {
            ChainError::MalformedResponse(err.to_string())
        } else {
            ChainError::NetworkError(err.to_string())
        }
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
