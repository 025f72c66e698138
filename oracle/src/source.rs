use {
  serde::{Deserialize, Serialize},
  std::sync::Arc,
  thiserror::Error,
};

#[derive(Debug, Clone, Error)]
pub enum SourceError {
  #[error("No rounds reported yet")]
  NoData,

  #[error("Price source failure: {0}")]
  Failure(String),
}

/// A single price report published by a price source.
///
/// Timestamps are unix seconds. A round that has been started but
/// never answered has `updated_at` set to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundData {
  pub round_id: u64,
  pub answer: i128,
  pub started_at: u64,
  pub updated_at: u64,
  pub answered_in_round: u64,
}

/// Read-only external collaborator that reports the exchange rate of
/// the native asset against the reference currency.
///
/// Answers are fixed-point integers with [`PriceSource::decimals`]
/// decimal places, e.g. an answer of `2000_00000000` with 8 decimals
/// means 2000 reference units per one native unit.
pub trait PriceSource: Send + Sync {
  fn decimals(&self) -> u8;
  fn description(&self) -> String;
  fn version(&self) -> u64;
  fn latest_round_data(&self) -> Result<RoundData, SourceError>;
}

impl<P: PriceSource + ?Sized> PriceSource for Arc<P> {
  fn decimals(&self) -> u8 {
    (**self).decimals()
  }

  fn description(&self) -> String {
    (**self).description()
  }

  fn version(&self) -> u64 {
    (**self).version()
  }

  fn latest_round_data(&self) -> Result<RoundData, SourceError> {
    (**self).latest_round_data()
  }
}

impl<P: PriceSource + ?Sized> PriceSource for Box<P> {
  fn decimals(&self) -> u8 {
    (**self).decimals()
  }

  fn description(&self) -> String {
    (**self).description()
  }

  fn version(&self) -> u64 {
    (**self).version()
  }

  fn latest_round_data(&self) -> Result<RoundData, SourceError> {
    (**self).latest_round_data()
  }
}
