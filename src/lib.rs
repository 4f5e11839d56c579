//! PeerChain - a small proof-of-work ledger node with longest-valid-chain consensus
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`hasher`] - Canonical serialization and SHA-256 digests
//! - [`transaction`] - Transaction types and boundary validation
//! - [`mempool`] - Pending transaction pool
//! - [`blockchain`] - Blocks, genesis and chain validation
//!
//! ## Consensus & Mining
//! - [`miner`] - Proof-of-work predicate and mining
//! - [`consensus`] - Longest-valid-chain resolution
//!
//! ## Networking
//! - [`peers`] - Peer addresses and registry
//! - [`network`] - Peer transport, discovery and gossip
//! - `api` - HTTP surface (feature `api`)
//!
//! ## Node & Utilities
//! - [`node`] - Node service and process orchestration
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod hasher;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod consensus;
pub mod miner;

// ============================================================================
// Networking
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod network;
pub mod peers;

// ============================================================================
// Node & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod node;

pub use blockchain::{Block, Blockchain};
pub use error::{ChainError, Result};
pub use node::Node;
pub use transaction::Transaction;
