mod execution;
mod ledger;
mod payout;
mod state;

pub use {
  execution::{execute, Outcome},
  ledger::{Error, FundingLedger, LedgerSnapshot, MINIMUM_USD},
  payout::{InMemoryBank, Payout, PayoutError, SettlementError},
  state::{InMemoryStateStore, State, StateDiff, StorageError},
};
