//! Claim hash computation
//!
//! Reproduces the outbox's claim identity bit-for-bit:
//!
//! ```solidity
//! keccak256(abi.encodePacked(
//!     stateRoot, claimer, timestampClaimed, timestampVerification,
//!     blocknumberVerification, honest, challenger
//! ))
//! ```
//!
//! Packed layout: 32 + 20 + 4 + 4 + 4 + 1 + 20 = 85 bytes.

use alloy::primitives::B256;
use tiny_keccak::{Hasher, Keccak};

use crate::types::Claim;

/// Length of the packed claim encoding
pub const PACKED_CLAIM_LEN: usize = 85;

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Packed encoding of a claim, fields in declaration order
pub fn encode_claim_packed(claim: &Claim) -> [u8; PACKED_CLAIM_LEN] {
    let mut data = [0u8; PACKED_CLAIM_LEN];

    // stateRoot (32 bytes)
    data[0..32].copy_from_slice(claim.state_root.as_slice());

    // claimer (20 bytes)
    data[32..52].copy_from_slice(claim.claimer.as_slice());

    // uint32 fields, big-endian
    data[52..56].copy_from_slice(&claim.timestamp_claimed.to_be_bytes());
    data[56..60].copy_from_slice(&claim.timestamp_verification.to_be_bytes());
    data[60..64].copy_from_slice(&claim.blocknumber_verification.to_be_bytes());

    // honest (uint8 enum)
    data[64] = claim.honest as u8;

    // challenger (20 bytes)
    data[65..85].copy_from_slice(claim.challenger.as_slice());

    data
}

/// Hash a claim the way the outbox stores it in `claimHashes[epoch]`
pub fn hash_claim(claim: &Claim) -> B256 {
    B256::from(keccak256(&encode_claim_packed(claim)))
}

/// A claim hash of all zeroes means no claim was made for the epoch
pub fn is_zero_hash(hash: &B256) -> bool {
    *hash == B256::ZERO
}

/// Whether a claim is the "no claim" sentinel (all-zero state root)
pub fn is_zero_claim(claim: &Claim) -> bool {
    claim.state_root == B256::ZERO
}

/// Format bytes32 as 0x-prefixed hex
pub fn bytes32_to_hex(bytes: &B256) -> String {
    format!("0x{}", hex::encode(bytes.as_slice()))
}
