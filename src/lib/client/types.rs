//! Request and response bodies of the network's HTTP API.

use crate::SignedTransaction;
use num_bigint::BigUint;
use num_traits::Num;
use serde::{Deserialize, Deserializer, Serialize};

/// Body of `POST /transaction/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionRequest {
    pub sender: String,
    pub receiver: String,
    pub value: String,
    pub data: String,
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub signature: String,
}

impl From<&SignedTransaction> for SendTransactionRequest {
    fn from(signed: &SignedTransaction) -> Self {
        let tx = &signed.transaction;
        Self {
            sender: tx.sender.to_hex(),
            receiver: tx.receiver.to_hex(),
            value: tx.value.to_string(),
            data: tx.data.clone(),
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            signature: signed.signature_hex(),
        }
    }
}

/// Response of `POST /transaction/send`. An empty hash means the transaction
/// was not accepted, whatever the HTTP status.
#[derive(Debug, Default, Deserialize)]
pub struct SendTransactionResponse {
    #[serde(rename = "txHash", default)]
    pub tx_hash: String,
    #[serde(rename = "Error", default)]
    pub error: String,
}

/// Account state as returned by `GET /address/{address}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub address: String,
    pub nonce: u64,
    #[serde(deserialize_with = "decimal")]
    pub balance: BigUint,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccountResponse {
    pub account: Account,
}

fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
    let text = String::deserialize(deserializer)?;
    BigUint::from_str_radix(text.trim(), 10).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, Transaction};

    #[test]
    fn request_body_round_trips() {
        let signed = SignedTransaction {
            transaction: Transaction {
                nonce: 5,
                sender: Address::from_bytes([0xab; 32]),
                receiver: Address::from_bytes([0x12; 32]),
                value: BigUint::from(1u32),
                data: "data".to_string(),
                gas_price: 1_000_000_000_000_000,
                gas_limit: 100_004,
            },
            signature: vec![0xde, 0xad, 0xbe, 0xef],
            signed_bytes: Vec::new(),
        };

        let request = SendTransactionRequest::from(&signed);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""gasPrice":1000000000000000"#));
        assert!(json.contains(r#""gasLimit":100004"#));
        assert!(json.contains(r#""signature":"deadbeef""#));

        let parsed: SendTransactionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.nonce, 5);
        assert_eq!(parsed.sender.parse::<Address>().unwrap(), signed.transaction.sender);
        assert_eq!(parsed.receiver.parse::<Address>().unwrap(), signed.transaction.receiver);
        assert_eq!(parsed.value.parse::<BigUint>().unwrap(), signed.transaction.value);
        assert_eq!(parsed.gas_price, signed.transaction.gas_price);
        assert_eq!(parsed.gas_limit, signed.transaction.gas_limit);
        assert_eq!(hex::decode(parsed.signature).unwrap(), signed.signature);
    }

    #[test]
    fn account_response_parses_nonce_and_balance() {
        let body = r#"{"account":{"address":"abc","nonce":5,"balance":"1000"}}"#;
        let response: AccountResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.account.nonce, 5);
        assert_eq!(response.account.balance, BigUint::from(1000u32));
        assert_eq!(response.account.address, "abc");
    }

    #[test]
    fn huge_balance_is_exact() {
        let body = r#"{"account":{"address":"abc","nonce":0,"balance":"340282366920938463463374607431768211456"}}"#;
        let response: AccountResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.account.balance, BigUint::from(1u8) << 128u32);
    }

    #[test]
    fn rejection_response_has_empty_hash() {
        let response: SendTransactionResponse =
            serde_json::from_str(r#"{"txHash":"","Error":"insufficient funds"}"#).unwrap();
        assert!(response.tx_hash.is_empty());
        assert_eq!(response.error, "insufficient funds");
    }
}
