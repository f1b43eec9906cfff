use crate::identity::Identity;
use crate::shard::Address;
use crate::{SignedTransaction, Transaction};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("failed to encode transaction: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transaction sender {sender} does not match signer {signer}")]
    SenderMismatch { sender: Address, signer: Address },
}

/// Anything able to produce signatures for one account.
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

impl Signer for Identity {
    fn address(&self) -> Address {
        Identity::address(self)
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.sign_bytes(message)
    }
}

/// Encodes `transaction` and signs the encoding. The returned value keeps the
/// signed bytes next to the signature so the submitted request is built from
/// the same transaction that was signed.
pub fn sign_transaction<S: Signer + ?Sized>(
    signer: &S,
    transaction: Transaction,
) -> Result<SignedTransaction, SignError> {
    if transaction.sender != signer.address() {
        return Err(SignError::SenderMismatch {
            sender: transaction.sender,
            signer: signer.address(),
        });
    }

    let signed_bytes = transaction.signing_bytes()?;
    let signature = signer.sign(&signed_bytes);

    Ok(SignedTransaction {
        transaction,
        signature,
        signed_bytes,
    })
}
