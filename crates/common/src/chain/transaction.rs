//! Binary transaction layout for function-call transactions.
//!
//! The chain hashes and verifies the borsh encoding of these types, so field
//! and variant order is part of the wire format. Only the shapes the billing
//! contract needs are modelled: a single `FunctionCall` action signed with an
//! Ed25519 key.

use super::ChainError;
use crate::signer::{AccountPublicKey, AccountSigner};
use borsh::BorshSerialize;
use sha2::{Digest, Sha256};

#[derive(BorshSerialize)]
enum PublicKey {
    Ed25519([u8; 32]),
}

#[derive(BorshSerialize)]
enum Signature {
    Ed25519([u8; 64]),
}

#[derive(BorshSerialize)]
struct FunctionCallAction {
    method_name: String,
    args: Vec<u8>,
    gas: u64,
    deposit: u128,
}

/// Variant order fixes the tag; `FunctionCall` must stay third.
#[derive(BorshSerialize)]
enum Action {
    #[allow(dead_code)]
    CreateAccount,
    #[allow(dead_code)]
    DeployContract { code: Vec<u8> },
    FunctionCall(FunctionCallAction),
}

#[derive(BorshSerialize)]
struct Transaction {
    signer_id: String,
    public_key: PublicKey,
    nonce: u64,
    receiver_id: String,
    block_hash: [u8; 32],
    actions: Vec<Action>,
}

#[derive(BorshSerialize)]
struct SignedTransaction {
    transaction: Transaction,
    signature: Signature,
}

fn to_bytes<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, ChainError> {
    borsh::to_vec(value).map_err(|e| ChainError::Encoding(e.to_string()))
}

pub(crate) struct FunctionCallTransaction<'a> {
    pub signer_id: &'a str,
    pub public_key: &'a AccountPublicKey,
    pub nonce: u64,
    pub receiver_id: &'a str,
    pub block_hash: [u8; 32],
    pub method_name: &'a str,
    pub args: &'a [u8],
    pub gas: u64,
    pub deposit: u128,
}

impl FunctionCallTransaction<'_> {
    fn transaction(&self) -> Transaction {
        Transaction {
            signer_id: self.signer_id.to_string(),
            public_key: PublicKey::Ed25519(*self.public_key.as_bytes()),
            nonce: self.nonce,
            receiver_id: self.receiver_id.to_string(),
            block_hash: self.block_hash,
            actions: vec![Action::FunctionCall(FunctionCallAction {
                method_name: self.method_name.to_string(),
                args: self.args.to_vec(),
                gas: self.gas,
                deposit: self.deposit,
            })],
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChainError> {
        to_bytes(&self.transaction())
    }

    /// Hash of the encoded transaction; this is what gets signed.
    pub fn hash(&self) -> Result<[u8; 32], ChainError> {
        Ok(Sha256::digest(self.encode()?).into())
    }

    /// Encode as a signed transaction ready for `broadcast_tx_commit`.
    pub fn sign(&self, signer: &AccountSigner) -> Result<Vec<u8>, ChainError> {
        let transaction = self.transaction();
        let hash: [u8; 32] = Sha256::digest(to_bytes(&transaction)?).into();
        let signature: [u8; 64] = signer
            .sign(&hash)
            .try_into()
            .map_err(|_| ChainError::Encoding("signature is not 64 bytes".to_string()))?;

        to_bytes(&SignedTransaction {
            transaction,
            signature: Signature::Ed25519(signature),
        })
    }
}
