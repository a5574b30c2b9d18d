//! Random identifiers for conferences, participants and calls.
//!
//! Identifiers are 128 random bits written as 22 characters of a 57-symbol
//! alphabet that leaves out look-alike characters (`0`, `1`, `I`, `O`, `l`).

use crate::errors::BillingError;
use ring::rand::{SecureRandom, SystemRandom};

const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Identifier length in characters.
pub const ID_LENGTH: usize = 22;

const ID_RANDOM_BYTES: usize = 16;

/// Generate a random identifier.
pub fn generate_id(rng: &SystemRandom) -> Result<String, BillingError> {
    let mut bytes = [0u8; ID_RANDOM_BYTES];
    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "billing.identifiers", error = %e, "Failed to generate random bytes for identifier");
        BillingError::Internal("RNG failure".to_string())
    })?;
    encode(u128::from_be_bytes(bytes))
}

/// Pick a uniformly-ish random index below `len`.
pub fn random_index(rng: &SystemRandom, len: usize) -> Result<usize, BillingError> {
    if len == 0 {
        return Err(BillingError::Internal("random index over empty set".to_string()));
    }
    let mut bytes = [0u8; 8];
    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "billing.identifiers", error = %e, "Failed to generate random bytes for index");
        BillingError::Internal("RNG failure".to_string())
    })?;
    let value = u64::from_be_bytes(bytes);
    let len = u64::try_from(len).map_err(|_| BillingError::Internal("set too large".to_string()))?;
    usize::try_from(value % len).map_err(|_| BillingError::Internal("index overflow".to_string()))
}

/// Encode `value` most-significant digit first, left-padded to `ID_LENGTH`.
fn encode(mut value: u128) -> Result<String, BillingError> {
    let base = ALPHABET.len() as u128;
    let mut id = Vec::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        let idx = usize::try_from(value % base)
            .map_err(|_| BillingError::Internal("identifier digit out of range".to_string()))?;
        let ch = ALPHABET
            .get(idx)
            .ok_or_else(|| BillingError::Internal("identifier digit out of range".to_string()))?;
        id.push(*ch);
        value /= base;
    }
    id.reverse();

    String::from_utf8(id)
        .map_err(|_| BillingError::Internal("identifier contained invalid UTF-8".to_string()))
}
