use {
  crate::{now, PriceSource, RoundData, SourceError},
  parking_lot::RwLock,
};

/// In-process price source with an answer that can be changed at will.
///
/// Used on local networks that have no real price feed deployed and
/// in tests. Every [`MockPriceFeed::update_answer`] opens and closes a
/// new round stamped with the current time.
#[derive(Debug)]
pub struct MockPriceFeed {
  decimals: u8,
  inner: RwLock<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
  latest: Option<RoundData>,
  failure: Option<String>,
}

impl MockPriceFeed {
  pub const VERSION: u64 = 4;

  pub fn new(decimals: u8, initial_answer: i128) -> Self {
    let feed = Self {
      decimals,
      inner: RwLock::new(MockState::default()),
    };
    feed.update_answer(initial_answer);
    feed
  }

  /// Publishes a new answer in a fresh round.
  pub fn update_answer(&self, answer: i128) {
    let mut inner = self.inner.write();
    let round_id = inner.latest.map(|r| r.round_id + 1).unwrap_or(1);
    let timestamp = now();
    inner.latest = Some(RoundData {
      round_id,
      answer,
      started_at: timestamp,
      updated_at: timestamp,
      answered_in_round: round_id,
    });
  }

  /// Replaces the latest round with explicit values.
  pub fn update_round_data(&self, round: RoundData) {
    self.inner.write().latest = Some(round);
  }

  /// While set, every read of the latest round fails with the given reason.
  pub fn set_failing(&self, reason: Option<String>) {
    self.inner.write().failure = reason;
  }
}

impl PriceSource for MockPriceFeed {
  fn decimals(&self) -> u8 {
    self.decimals
  }

  fn description(&self) -> String {
    "v0.8/tests/MockV3Aggregator.sol".into()
  }

  fn version(&self) -> u64 {
    Self::VERSION
  }

  fn latest_round_data(&self) -> Result<RoundData, SourceError> {
    let inner = self.inner.read();
    if let Some(reason) = &inner.failure {
      return Err(SourceError::Failure(reason.clone()));
    }
    inner.latest.ok_or(SourceError::NoData)
  }
}
