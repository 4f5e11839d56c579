use crate::error::ChainError;
use crate::miner::ProofOfWork;

use super::chain::Block;

/// Check that `block` may follow `prev`: consecutive index, linked
/// `previous_hash`, a stored hash that matches its fields, and a nonce that
/// satisfies the proof predicate against `prev`.
pub fn validate_successor(prev: &Block, block: &Block, pow: &ProofOfWork) -> Result<(), ChainError> {
    if block.index != prev.index + 1 {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid block index. Expected {}, but got {}.",
            prev.index + 1,
            block.index
        )));
    }

    if block.previous_hash != prev.hash {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid previous block hash at index {}. Expected {}, but got {}.",
            block.index, prev.hash, block.previous_hash
        )));
    }

    let recomputed = block.calculate_hash();
    if recomputed != block.hash {
        return Err(ChainError::InvalidBlock(format!(
            "Hash mismatch at index {}. Expected {}, but got {}.",
            block.index, recomputed, block.hash
        )));
    }

    if !pow.valid_proof(prev.nonce, block.nonce, &block.previous_hash) {
        return Err(ChainError::InvalidProofOfWork { index: block.index });
    }

    Ok(())
}

/// Structural and cryptographic validation of a whole chain. Transaction
/// contents (balances, double spends) are not re-derived.
pub fn validate_chain(blocks: &[Block], pow: &ProofOfWork) -> Result<(), ChainError> {
    match blocks.first() {
        Some(first) if *first == Block::genesis() => {}
        _ => return Err(ChainError::InvalidGenesis),
    }

    for pair in blocks.windows(2) {
        validate_successor(&pair[0], &pair[1], pow)?;
    }
    Ok(())
}

pub fn is_valid_chain(blocks: &[Block], pow: &ProofOfWork) -> bool {
    validate_chain(blocks, pow).is_ok()
}
