use {
  fundme_ledger::{FundingLedger, InMemoryBank, InMemoryStateStore},
  fundme_oracle::{MockPriceFeed, OracleConfig, PriceOracle},
  fundme_primitives::Address,
  std::sync::Arc,
};

/// Price of one native unit used across tests: 2000 with 8 decimals.
pub const ANSWER: i128 = 2000_00000000;
pub const DECIMALS: u8 = 8;

pub type TestLedger =
  FundingLedger<InMemoryStateStore, Arc<InMemoryBank>, Arc<MockPriceFeed>>;

/// A ledger wired to in-memory collaborators, with handles
/// to the bank and price feed so tests can observe and steer them.
pub struct Fixture {
  pub owner: Address,
  pub ledger: TestLedger,
  pub bank: Arc<InMemoryBank>,
  pub feed: Arc<MockPriceFeed>,
}

pub fn random_address() -> Address {
  Address::new(rand::random())
}

pub fn fixture() -> Fixture {
  let owner = random_address();
  let bank = Arc::new(InMemoryBank::default());
  let feed = Arc::new(MockPriceFeed::new(DECIMALS, ANSWER));
  let ledger = FundingLedger::open(
    owner,
    PriceOracle::new(Arc::clone(&feed), OracleConfig::default()),
    InMemoryStateStore::default(),
    Arc::clone(&bank),
  )
  .expect("opening an empty in-memory ledger");

  Fixture {
    owner,
    ledger,
    bank,
    feed,
  }
}
