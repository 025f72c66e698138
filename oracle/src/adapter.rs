use {
  crate::{now, PriceSource, SourceError},
  std::time::Duration,
  thiserror::Error,
  tracing::warn,
};

#[derive(Debug, Clone, Error)]
pub enum Error {
  #[error("Price source unavailable: {0}")]
  Unavailable(#[from] SourceError),

  #[error("Price is stale, last updated at {updated_at} ({age:?} ago)")]
  Stale { updated_at: u64, age: Duration },

  #[error("Price source reported a non-positive answer {0}")]
  InvalidAnswer(i128),

  #[error("Round {0} has not been answered yet")]
  IncompleteRound(u64),

  #[error("Arithmetic overflow while converting to reference currency")]
  Overflow,
}

#[derive(Debug, Clone, Default)]
pub struct OracleConfig {
  /// Answers older than this are rejected as stale.
  /// When `None` answers of any age are accepted.
  pub max_staleness: Option<Duration>,
}

/// Wraps a price source and converts native asset amounts
/// into the reference currency.
///
/// The adapter is a pure function of the latest answer of the
/// source and the amount being converted, it never caches answers.
#[derive(Debug)]
pub struct PriceOracle<P: PriceSource> {
  source: P,
  config: OracleConfig,
}

impl<P: PriceSource> PriceOracle<P> {
  pub fn new(source: P, config: OracleConfig) -> Self {
    Self { source, config }
  }

  pub fn source(&self) -> &P {
    &self.source
  }

  /// Number of decimal places of values returned by
  /// [`PriceOracle::current_price`].
  pub fn decimals(&self) -> u8 {
    self.source.decimals()
  }

  /// Latest exchange rate of the native asset against the reference
  /// currency, with [`PriceOracle::decimals`] decimal places.
  pub fn current_price(&self) -> Result<u128, Error> {
    let round = self.source.latest_round_data()?;

    if round.updated_at == 0 || round.answered_in_round < round.round_id {
      return Err(Error::IncompleteRound(round.round_id));
    }

    if let Some(max_staleness) = self.config.max_staleness {
      let age = Duration::from_secs(now().saturating_sub(round.updated_at));
      if age > max_staleness {
        warn!("rejecting stale price from round {}", round.round_id);
        return Err(Error::Stale {
          updated_at: round.updated_at,
          age,
        });
      }
    }

    if round.answer <= 0 {
      return Err(Error::InvalidAnswer(round.answer));
    }

    // positive i128 always fits in u128
    Ok(round.answer.unsigned_abs())
  }

  /// Value of `amount` native units in the reference currency.
  ///
  /// The amount is multiplied by the price before dividing by the price
  /// scale, so that no precision of the price is lost. The result has
  /// the same number of decimals as `amount`.
  pub fn convert(&self, amount: u128) -> Result<u128, Error> {
    if amount == 0 {
      return Ok(0);
    }

    let price = self.current_price()?;
    let scale = 10u128
      .checked_pow(self.decimals() as u32)
      .ok_or(Error::Overflow)?;

    amount
      .checked_mul(price)
      .map(|product| product / scale)
      .ok_or(Error::Overflow)
  }

  /// Interface version of the underlying price source.
  pub fn source_version(&self) -> u64 {
    self.source.version()
  }
}
