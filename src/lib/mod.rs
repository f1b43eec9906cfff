use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::Serialize;
use serde_json::value::RawValue;

pub mod client;
pub mod config;
pub mod engine;
pub mod identity;
pub mod shard;
pub mod signer;
pub mod targets;

pub use client::{Account, ClientError, HttpSubmissionClient, SubmissionClient};
pub use config::{ConfigError, NoncePolicy, SenderConfig};
pub use engine::{BatchOutcome, Engine, IdentityReport, SeedError, SenderStats};
pub use identity::{Identity, KeyError};
pub use shard::{shard_of, Address, ShardError, ShardId, NUM_SHARDS};
pub use signer::{sign_transaction, SignError, Signer};
pub use targets::{HostTable, ProxyPool, TargetError, TargetTable};

/// A value transfer from one account to another, before signing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub sender: Address,
    pub receiver: Address,
    pub value: BigUint,
    pub data: String,
    pub gas_price: u64,
    pub gas_limit: u64,
}

/// Field layout the network hashes and verifies signatures over.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningPayload<'a> {
    nonce: u64,
    value: &'a RawValue,
    receiver: String,
    sender: String,
    #[serde(skip_serializing_if = "is_zero")]
    gas_price: u64,
    #[serde(skip_serializing_if = "is_zero")]
    gas_limit: u64,
    #[serde(skip_serializing_if = "str::is_empty")]
    data: &'a str,
}

fn is_zero(n: &u64) -> bool {
    n.is_zero()
}

impl Transaction {
    /// Canonical encoding of the transaction, i.e. the exact bytes that get signed.
    ///
    /// Compact JSON with the value as a bare (arbitrary size) number and the
    /// addresses as base64 of their raw bytes.
    pub fn signing_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let value = RawValue::from_string(self.value.to_string())?;
        let payload = SigningPayload {
            nonce: self.nonce,
            value: &value,
            receiver: B64.encode(self.receiver.as_bytes()),
            sender: B64.encode(self.sender.as_bytes()),
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            data: &self.data,
        };
        serde_json::to_vec(&payload)
    }
}

/// A transaction together with its signature and the bytes the signature covers.
#[derive(Clone, Debug)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Vec<u8>,
    pub signed_bytes: Vec<u8>,
}

impl SignedTransaction {
    pub fn signature_hex(&self) -> String {
        hex::encode(&self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction() -> Transaction {
        Transaction {
            nonce: 7,
            sender: Address::from_bytes([1; 32]),
            receiver: Address::from_bytes([2; 32]),
            value: BigUint::from(1u32),
            data: String::new(),
            gas_price: 1_000_000_000_000_000,
            gas_limit: 100_000,
        }
    }

    #[test]
    fn signing_bytes_layout() {
        let bytes = transaction().signing_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            format!(
                r#"{{"nonce":7,"value":1,"receiver":"{}","sender":"{}","gasPrice":1000000000000000,"gasLimit":100000}}"#,
                B64.encode([2u8; 32]),
                B64.encode([1u8; 32]),
            )
        );
    }

    #[test]
    fn large_values_stay_exact() {
        let mut tx = transaction();
        tx.value = "123456789012345678901234567890".parse().unwrap();
        tx.data = "hello".to_string();
        let text = String::from_utf8(tx.signing_bytes().unwrap()).unwrap();
        assert!(text.contains(r#""value":123456789012345678901234567890,"#));
        assert!(text.ends_with(r#""data":"hello"}"#));
    }
}
