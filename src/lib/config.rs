//! Engine configuration and the startup errors that abort a run before any
//! transaction is sent.

use crate::targets::TargetError;
use num_bigint::BigUint;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_GAS_PRICE: u64 = 1_000_000_000_000_000;
pub const DEFAULT_GAS_LIMIT: u64 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("transactions per batch must be at least 1")]
    ZeroBatchSize,

    #[error("cross-shard ratio must be within [0, 1], got {0}")]
    CrossShardRatio(f64),

    #[error("API host {0} is only reachable through a proxy, but the proxy pool is empty")]
    ProxyRequired(String),

    #[error("gas limit {base} plus {payload_len} payload bytes overflows")]
    GasLimitOverflow { base: u64, payload_len: usize },

    #[error("failed to read payload file {path}: {source}")]
    Payload { path: PathBuf, source: io::Error },

    #[error("payload file {path} is not valid UTF-8")]
    PayloadEncoding { path: PathBuf },

    #[error(transparent)]
    Targets(#[from] TargetError),
}

/// What to do with the local nonce counter after a batch in which some
/// submissions failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NoncePolicy {
    /// Failed nonces stay consumed; the next batch starts right after the last one.
    #[default]
    Advance,

    /// Re-fetch the account and rewind to the remote nonce when it is behind.
    Resync,
}

#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// Explicit API host. When unset, each identity picks one for its shard.
    pub api_host: Option<String>,
    /// Transactions in flight per identity per batch.
    pub batch_size: usize,
    pub value: BigUint,
    pub data: String,
    pub gas_price: u64,
    /// Gas limit before the per-byte data allowance is added.
    pub base_gas_limit: u64,
    pub cross_shard_ratio: f64,
    pub nonce_policy: NoncePolicy,
    /// Stop each identity after this many batches.
    pub max_batches: Option<u64>,
    pub seed: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            api_host: None,
            batch_size: 1,
            value: BigUint::from(1u32),
            data: String::new(),
            gas_price: DEFAULT_GAS_PRICE,
            base_gas_limit: DEFAULT_GAS_LIMIT,
            cross_shard_ratio: 0.0,
            nonce_policy: NoncePolicy::Advance,
            max_batches: None,
            seed: 0,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if !(0.0..=1.0).contains(&self.cross_shard_ratio) {
            return Err(ConfigError::CrossShardRatio(self.cross_shard_ratio));
        }
        if self
            .base_gas_limit
            .checked_add(self.data.len() as u64)
            .is_none()
        {
            return Err(ConfigError::GasLimitOverflow {
                base: self.base_gas_limit,
                payload_len: self.data.len(),
            });
        }
        Ok(())
    }

    /// Base gas limit plus one unit per payload byte. Saturates on overflow,
    /// which `validate` rejects.
    pub fn gas_limit(&self) -> u64 {
        self.base_gas_limit.saturating_add(self.data.len() as u64)
    }
}

/// Reads the transaction payload. A missing file means an empty payload.
pub fn read_payload(path: impl AsRef<Path>) -> Result<String, ConfigError> {
    let path = path.as_ref();
    match fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes).map_err(|_| ConfigError::PayloadEncoding {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(ConfigError::Payload {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::NamedTempFile;

    #[test]
    fn gas_limit_grows_with_payload() {
        let config = SenderConfig {
            data: "0123456789".to_string(),
            ..Default::default()
        };
        assert_eq!(config.gas_limit(), DEFAULT_GAS_LIMIT + 10);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let zero = SenderConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroBatchSize)));

        let ratio = SenderConfig {
            cross_shard_ratio: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            ratio.validate(),
            Err(ConfigError::CrossShardRatio(_))
        ));

        let gas = SenderConfig {
            base_gas_limit: u64::MAX,
            data: "x".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            gas.validate(),
            Err(ConfigError::GasLimitOverflow { payload_len: 1, .. })
        ));

        SenderConfig::default().validate().unwrap();
    }

    #[test]
    fn payload_file_is_optional() {
        assert_eq!(read_payload("/no/such/tx_data.txt").unwrap(), "");

        let file = NamedTempFile::new("tx_data.txt").unwrap();
        file.write_str("load test").unwrap();
        assert_eq!(read_payload(file.path()).unwrap(), "load test");
    }

    #[test]
    fn payload_must_be_utf8() {
        let file = NamedTempFile::new("tx_data.bin").unwrap();
        file.write_binary(&[0x66, 0xff, 0xfe]).unwrap();

        assert!(matches!(
            read_payload(file.path()),
            Err(ConfigError::PayloadEncoding { .. })
        ));
    }
}
