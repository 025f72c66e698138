mod adapter;
mod mock;
mod source;

pub use {
  adapter::{Error, OracleConfig, PriceOracle},
  mock::MockPriceFeed,
  source::{PriceSource, RoundData, SourceError},
};

/// Current unix time in seconds.
pub(crate) fn now() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}
