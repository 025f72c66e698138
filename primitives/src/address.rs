use {
  serde::{Deserialize, Serialize},
  std::{
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
  },
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("Invalid base58 encoding: {0}")]
  Encoding(#[from] bs58::decode::Error),

  #[error("Expected a 32 bytes address, got {0} bytes")]
  InvalidLength(usize),
}

/// Opaque identity of an account that interacts with the ledger.
///
/// The same type identifies contributors, the ledger owner and
/// the recipients of payouts.
///
/// Addresses are displayed, parsed and serialized as base58 strings,
/// so they can be used verbatim in urls, JSON bodies and storage keys.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address([u8; 32]);

impl Address {
  pub const fn new(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  pub fn to_bytes(&self) -> [u8; 32] {
    self.0
  }
}

impl From<[u8; 32]> for Address {
  fn from(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }
}

impl AsRef<[u8]> for Address {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl Deref for Address {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl Debug for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "address({})", bs58::encode(self.0).into_string())
  }
}

impl From<Address> for String {
  fn from(addr: Address) -> Self {
    bs58::encode(addr.0).into_string()
  }
}

impl FromStr for Address {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let decoded = bs58::decode(s).into_vec()?;
    let bytes: [u8; 32] = decoded
      .as_slice()
      .try_into()
      .map_err(|_| Error::InvalidLength(decoded.len()))?;
    Ok(Self(bytes))
  }
}

impl TryFrom<&str> for Address {
  type Error = Error;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    FromStr::from_str(value)
  }
}

impl TryFrom<String> for Address {
  type Error = Error;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    FromStr::from_str(&value)
  }
}

#[cfg(test)]
mod tests {
  use super::{Address, Error};

  #[test]
  fn base58_roundtrip() -> anyhow::Result<()> {
    let addr = Address::new([7u8; 32]);
    let parsed: Address = addr.to_string().parse()?;
    assert_eq!(addr, parsed);
    Ok(())
  }

  #[test]
  fn rejects_short_addresses() {
    let short = bs58::encode([1u8; 20]).into_string();
    assert!(matches!(
      short.parse::<Address>(),
      Err(Error::InvalidLength(20))
    ));
  }

  #[test]
  fn serializes_as_base58_string() -> anyhow::Result<()> {
    let addr = Address::new([9u8; 32]);
    let bytes = rmp_serde::to_vec(&addr)?;
    let string: String = rmp_serde::from_slice(&bytes)?;
    assert_eq!(string, addr.to_string());
    assert_eq!(rmp_serde::from_slice::<Address>(&bytes)?, addr);
    Ok(())
  }
}
