use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of shards in the network. Shard ids are `0..NUM_SHARDS`.
pub const NUM_SHARDS: u8 = 5;

/// Length in bytes of an account address (an ed25519 public key).
pub const ADDRESS_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("invalid address {0:?}: expected a non-empty hex string")]
    InvalidAddress(String),

    #[error("shard {0} is out of range (network has {} shards)", NUM_SHARDS)]
    OutOfRange(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(u8);

impl ShardId {
    pub fn new(id: u8) -> Result<Self, ShardError> {
        if id < NUM_SHARDS {
            Ok(ShardId(id))
        } else {
            Err(ShardError::OutOfRange(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The shard `by` positions after this one, wrapping around.
    pub fn offset(self, by: u8) -> ShardId {
        ShardId(((self.0 as u16 + by as u16) % NUM_SHARDS as u16) as u8)
    }

    /// Every shard of the network, in ascending order.
    pub fn all() -> impl Iterator<Item = ShardId> {
        (0..NUM_SHARDS).map(ShardId)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps an account address to its shard by looking at the last hex digit of
/// its textual form.
///
/// The digit partition is fixed by the network: `0,8` live on shard 0,
/// `1,5,9,d` on shard 1, `2,6,a,e` on shard 2, `3,7,b,f` on shard 3 and
/// `4,c` on shard 4. Upper-case digits are accepted.
pub fn shard_of(address: &str) -> Result<ShardId, ShardError> {
    let last = address
        .chars()
        .last()
        .ok_or_else(|| ShardError::InvalidAddress(address.to_string()))?;

    let shard = match last.to_ascii_lowercase() {
        '0' | '8' => 0,
        '1' | '5' | '9' | 'd' => 1,
        '2' | '6' | 'a' | 'e' => 2,
        '3' | '7' | 'b' | 'f' => 3,
        '4' | 'c' => 4,
        _ => return Err(ShardError::InvalidAddress(address.to_string())),
    };

    Ok(ShardId(shard))
}

/// Raw account address. Displayed and parsed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn shard(&self) -> ShardId {
        // the last byte's low nibble is the last hex digit
        match self.0[ADDRESS_LEN - 1] & 0x0f {
            0x0 | 0x8 => ShardId(0),
            0x1 | 0x5 | 0x9 | 0xd => ShardId(1),
            0x2 | 0x6 | 0xa | 0xe => ShardId(2),
            0x3 | 0x7 | 0xb | 0xf => ShardId(3),
            _ => ShardId(4),
        }
    }
}

impl FromStr for Address {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| ShardError::InvalidAddress(s.to_string()))?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_hex_digit_maps_to_exactly_one_shard() {
        let mut per_shard = [0usize; NUM_SHARDS as usize];
        for digit in "0123456789abcdef".chars() {
            let shard = shard_of(&format!("aa{digit}")).unwrap();
            assert!(shard.get() < NUM_SHARDS);
            per_shard[shard.index()] += 1;
        }
        assert_eq!(per_shard, [2, 4, 4, 4, 2]);
        assert_eq!(per_shard.iter().sum::<usize>(), 16);
    }

    #[test]
    fn shard_of_is_case_insensitive_and_deterministic() {
        assert_eq!(shard_of("00D").unwrap(), shard_of("00d").unwrap());
        assert_eq!(shard_of("00d").unwrap(), ShardId(1));
        assert_eq!(shard_of("c").unwrap(), ShardId(4));
        assert_eq!(shard_of("abc8").unwrap(), ShardId(0));
    }

    #[test]
    fn empty_or_non_hex_address_is_rejected() {
        assert_eq!(
            shard_of(""),
            Err(ShardError::InvalidAddress(String::new()))
        );
        assert!(matches!(shard_of("abcz"), Err(ShardError::InvalidAddress(_))));
    }

    #[test]
    fn typed_address_agrees_with_text_resolution() {
        for last in 0u8..=255 {
            let mut bytes = [7u8; ADDRESS_LEN];
            bytes[ADDRESS_LEN - 1] = last;
            let address = Address::from_bytes(bytes);
            assert_eq!(address.shard(), shard_of(&address.to_hex()).unwrap());
        }
    }

    #[test]
    fn address_hex_parsing() {
        let hex = "c427aa79c2545ba8b00663ee1d02a785a7712ba2bba6eb4aa940ebc9eada7250";
        let address: Address = hex.parse().unwrap();
        assert_eq!(address.to_string(), hex);
        assert!("c427".parse::<Address>().is_err());
        assert!(ShardId::new(5).is_err());
    }
}
