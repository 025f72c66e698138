use {
  fundme_ledger::{
    InMemoryBank,
    Payout,
    PayoutError,
    SettlementError,
    State,
    StateDiff,
    StorageError,
  },
  fundme_primitives::{Address, Amount},
  rmp_serde::{from_slice, to_vec},
  serde::{de::DeserializeOwned, Serialize},
  sled::{
    transaction::{
      ConflictableTransactionError,
      ConflictableTransactionResult,
      TransactionError,
      TransactionalTree,
    },
    Transactional,
  },
};

const LEDGER_TREE: &str = "ledger";
const BANK_TREE: &str = "bank";

const OWNER_KEY: &str = "owner";
const HELD_KEY: &str = "held";
const ROSTER_LEN_KEY: &str = "roster/len";

fn contribution_key(contributor: &Address) -> String {
  format!("contribution/{contributor}")
}

fn roster_key(index: usize) -> String {
  format!("roster/{index:020}")
}

fn io_error(e: sled::Error) -> StorageError {
  StorageError::Io(e.to_string())
}

fn corrupt(key: &str, e: impl ToString) -> StorageError {
  StorageError::Corrupt {
    key: key.to_owned(),
    reason: e.to_string(),
  }
}

fn settlement_error(e: TransactionError<SettlementError>) -> SettlementError {
  match e {
    TransactionError::Abort(e) => e,
    TransactionError::Storage(e) => io_error(e).into(),
  }
}

fn read<T: DeserializeOwned>(
  tree: &sled::Tree,
  key: &str,
) -> Result<Option<T>, StorageError> {
  match tree.get(key).map_err(io_error)? {
    Some(bytes) => {
      from_slice(&bytes).map(Some).map_err(|e| corrupt(key, e))
    }
    None => Ok(None),
  }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
  to_vec(value).map_err(|e| corrupt(key, e))
}

/// Adds `amount` to the balance of `to` inside a transaction on the bank tree.
fn credit(
  bank: &TransactionalTree,
  to: &Address,
  amount: Amount,
) -> ConflictableTransactionResult<(), SettlementError> {
  let abort = |e: SettlementError| ConflictableTransactionError::Abort(e);
  let key = to.to_string();

  let balance: Amount = match bank.get(key.as_str())? {
    Some(bytes) => {
      from_slice(&bytes).map_err(|e| abort(corrupt(&key, e).into()))?
    }
    None => 0,
  };

  let updated = balance
    .checked_add(amount)
    .ok_or_else(|| abort(PayoutError::Overflow(*to).into()))?;

  bank.insert(
    key.as_str(),
    encode(&key, &updated).map_err(|e| abort(e.into()))?,
  )?;
  Ok(())
}

/// Ledger records persisted in a sled tree.
///
/// Values are MessagePack encoded. Every state diff is written
/// as a single sled batch, so a diff is either fully persisted
/// or not at all, and the tree is flushed before `apply` returns.
///
/// Payouts are credited to the bank tree of the same database, in the
/// same transaction that commits the ledger records. This is the tree
/// [`OnDiskBank`] reads and writes.
pub struct OnDiskStateStore {
  tree: sled::Tree,
  bank: sled::Tree,
}

impl OnDiskStateStore {
  pub fn new(db: &sled::Db) -> Result<Self, sled::Error> {
    Ok(Self {
      tree: db.open_tree(LEDGER_TREE)?,
      bank: db.open_tree(BANK_TREE)?,
    })
  }

  fn batch(&self, diff: &StateDiff) -> Result<sled::Batch, StorageError> {
    let mut batch = sled::Batch::default();

    if let Some(owner) = diff.owner_change() {
      batch.insert(OWNER_KEY, encode(OWNER_KEY, owner)?);
    }

    for (contributor, amount) in diff.contributions() {
      let key = contribution_key(contributor);
      batch.insert(key.as_str(), encode(&key, amount)?);
    }

    let mut len = self.roster_len()?;
    if diff.clears_roster() {
      for index in 0..len {
        batch.remove(roster_key(index).as_str());
      }
      len = 0;
    }

    for contributor in diff.appended() {
      let key = roster_key(len);
      batch.insert(key.as_str(), encode(&key, contributor)?);
      len += 1;
    }

    if diff.clears_roster() || !diff.appended().is_empty() {
      batch.insert(ROSTER_LEN_KEY, encode(ROSTER_LEN_KEY, &(len as u64))?);
    }

    if let Some(held) = diff.held_change() {
      batch.insert(HELD_KEY, encode(HELD_KEY, &held)?);
    }

    Ok(batch)
  }
}

impl State for OnDiskStateStore {
  fn owner(&self) -> Result<Option<Address>, StorageError> {
    read(&self.tree, OWNER_KEY)
  }

  fn contribution(&self, contributor: &Address) -> Result<Amount, StorageError> {
    Ok(read(&self.tree, &contribution_key(contributor))?.unwrap_or_default())
  }

  fn roster_len(&self) -> Result<usize, StorageError> {
    Ok(read::<u64>(&self.tree, ROSTER_LEN_KEY)?.unwrap_or_default() as usize)
  }

  fn roster_at(&self, index: usize) -> Result<Option<Address>, StorageError> {
    read(&self.tree, &roster_key(index))
  }

  fn held(&self) -> Result<Amount, StorageError> {
    Ok(read(&self.tree, HELD_KEY)?.unwrap_or_default())
  }

  fn apply(&mut self, diff: StateDiff) -> Result<(), StorageError> {
    let batch = self.batch(&diff)?;
    self.tree.apply_batch(batch).map_err(io_error)?;
    self.tree.flush().map_err(io_error)?;
    Ok(())
  }

  /// Commits `diff` and credits the bank tree in one sled transaction.
  ///
  /// A crash or failure at any point leaves either both changes or
  /// neither of them on disk, so `undo` is never needed.
  fn apply_with_payout(
    &mut self,
    diff: StateDiff,
    _undo: StateDiff,
    _payout: &dyn Payout,
    to: &Address,
    amount: Amount,
  ) -> Result<(), SettlementError> {
    let batch = self.batch(&diff)?;

    (&self.tree, &self.bank)
      .transaction(
        |(ledger, bank)| -> ConflictableTransactionResult<(), SettlementError> {
          ledger.apply_batch(&batch)?;
          credit(bank, to, amount)
        },
      )
      .map_err(settlement_error)?;

    self.tree.flush().map_err(io_error)?;
    Ok(())
  }
}

/// Host accounts that receive withdrawn funds.
pub trait Balances: Payout {
  fn balance_of(&self, account: &Address) -> Result<Amount, StorageError>;
}

impl Balances for InMemoryBank {
  fn balance_of(&self, account: &Address) -> Result<Amount, StorageError> {
    Ok(InMemoryBank::balance_of(self, account))
  }
}

/// Host account balances persisted in a sled tree.
///
/// Every credit is a sled transaction, so it serializes with the
/// withdrawals that [`OnDiskStateStore`] commits to the same tree.
pub struct OnDiskBank {
  tree: sled::Tree,
}

impl OnDiskBank {
  pub fn new(db: &sled::Db) -> Result<Self, sled::Error> {
    Ok(Self {
      tree: db.open_tree(BANK_TREE)?,
    })
  }
}

impl Balances for OnDiskBank {
  fn balance_of(&self, account: &Address) -> Result<Amount, StorageError> {
    Ok(read(&self.tree, &account.to_string())?.unwrap_or_default())
  }
}

impl Payout for OnDiskBank {
  fn transfer(&self, to: &Address, amount: Amount) -> Result<(), PayoutError> {
    let backend = |e: SettlementError| match e {
      SettlementError::Payout(e) => e,
      SettlementError::Storage(e) => PayoutError::Backend(e.to_string()),
    };

    self
      .tree
      .transaction(|bank| credit(bank, to, amount))
      .map_err(|e| backend(settlement_error(e)))?;
    self
      .tree
      .flush()
      .map_err(|e| PayoutError::Backend(e.to_string()))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{Balances, OnDiskBank, OnDiskStateStore},
    fundme_ledger::{Error, FundingLedger, Payout, PayoutError, State, StateDiff},
    fundme_oracle::{MockPriceFeed, OracleConfig, PriceOracle},
    fundme_primitives::{fraction, Address},
    std::sync::Arc,
  };

  fn oracle() -> PriceOracle<MockPriceFeed> {
    PriceOracle::new(
      MockPriceFeed::new(8, 2000_00000000),
      OracleConfig::default(),
    )
  }

  #[test]
  fn applies_and_reads_back_diffs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = sled::open(dir.path())?;
    let mut store = OnDiskStateStore::new(&db)?;

    let alice = Address::new([1; 32]);
    let bob = Address::new([2; 32]);

    assert_eq!(store.owner()?, None);
    assert_eq!(store.roster_len()?, 0);
    assert_eq!(store.held()?, 0);

    let mut diff = StateDiff::default();
    diff.set_contribution(alice, 10);
    diff.push_contributor(alice);
    diff.set_contribution(bob, 5);
    diff.push_contributor(bob);
    diff.push_contributor(alice);
    diff.set_held(15);
    store.apply(diff)?;

    assert_eq!(store.contribution(&alice)?, 10);
    assert_eq!(store.contribution(&bob)?, 5);
    assert_eq!(store.roster_len()?, 3);
    assert_eq!(store.roster_at(2)?, Some(alice));
    assert_eq!(store.held()?, 15);

    let mut reset = StateDiff::default();
    reset.set_contribution(alice, 0);
    reset.set_contribution(bob, 0);
    reset.clear_roster();
    reset.set_held(0);
    store.apply(reset)?;

    assert_eq!(store.roster_len()?, 0);
    assert_eq!(store.roster_at(0)?, None);
    assert_eq!(store.contribution(&alice)?, 0);
    assert_eq!(store.held()?, 0);
    Ok(())
  }

  #[test]
  fn ledger_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let owner = Address::new([9; 32]);
    let alice = Address::new([1; 32]);

    {
      let db = sled::open(dir.path())?;
      let ledger = FundingLedger::open(
        owner,
        oracle(),
        OnDiskStateStore::new(&db)?,
        OnDiskBank::new(&db)?,
      )?;
      ledger.contribute(alice, fraction(1, 10))?;
      ledger.contribute(alice, fraction(2, 10))?;
    }

    let db = sled::open(dir.path())?;
    let bank = OnDiskBank::new(&db)?;
    let ledger = FundingLedger::open(
      owner,
      oracle(),
      OnDiskStateStore::new(&db)?,
      bank,
    )?;

    assert_eq!(ledger.contribution_of(&alice)?, fraction(3, 10));
    assert_eq!(ledger.contributors_len()?, 2);
    assert_eq!(ledger.held()?, fraction(3, 10));

    assert_eq!(ledger.withdraw(owner)?, fraction(3, 10));
    assert_eq!(ledger.contribution_of(&alice)?, 0);
    assert_eq!(ledger.contributors_len()?, 0);
    Ok(())
  }

  #[test]
  fn reopening_with_other_owner_fails() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = sled::open(dir.path())?;

    FundingLedger::open(
      Address::new([1; 32]),
      oracle(),
      OnDiskStateStore::new(&db)?,
      OnDiskBank::new(&db)?,
    )?;

    let result = FundingLedger::open(
      Address::new([2; 32]),
      oracle(),
      OnDiskStateStore::new(&db)?,
      OnDiskBank::new(&db)?,
    );
    assert!(result.is_err());
    Ok(())
  }

  #[test]
  fn bank_persists_balances() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = sled::open(dir.path())?;
    let bank = OnDiskBank::new(&db)?;
    let owner = Address::new([3; 32]);

    bank.transfer(&owner, 40)?;
    bank.transfer(&owner, 2)?;
    assert_eq!(bank.balance_of(&owner)?, 42);
    assert_eq!(bank.balance_of(&Address::new([4; 32]))?, 0);
    Ok(())
  }

  #[test]
  fn withdrawal_credits_bank_with_reset() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let owner = Address::new([9; 32]);
    let alice = Address::new([1; 32]);

    {
      let db = sled::open(dir.path())?;
      let bank = Arc::new(OnDiskBank::new(&db)?);
      let ledger = FundingLedger::open(
        owner,
        oracle(),
        OnDiskStateStore::new(&db)?,
        Arc::clone(&bank),
      )?;
      ledger.contribute(alice, fraction(1, 10))?;
      assert_eq!(ledger.withdraw(owner)?, fraction(1, 10));
      assert_eq!(bank.balance_of(&owner)?, fraction(1, 10));
    }

    let db = sled::open(dir.path())?;
    let store = OnDiskStateStore::new(&db)?;
    assert_eq!(OnDiskBank::new(&db)?.balance_of(&owner)?, fraction(1, 10));
    assert_eq!(store.held()?, 0);
    assert_eq!(store.roster_len()?, 0);
    assert_eq!(store.contribution(&alice)?, 0);
    Ok(())
  }

  #[test]
  fn aborted_credit_keeps_records() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = sled::open(dir.path())?;
    let owner = Address::new([9; 32]);
    let alice = Address::new([1; 32]);

    let bank = Arc::new(OnDiskBank::new(&db)?);
    bank.transfer(&owner, u128::MAX)?;

    let ledger = FundingLedger::open(
      owner,
      oracle(),
      OnDiskStateStore::new(&db)?,
      Arc::clone(&bank),
    )?;
    ledger.contribute(alice, fraction(1, 10))?;
    let before = ledger.snapshot()?;

    assert!(matches!(
      ledger.withdraw(owner),
      Err(Error::TransferFailed(PayoutError::Overflow(to))) if to == owner
    ));
    assert_eq!(ledger.snapshot()?, before);
    assert_eq!(bank.balance_of(&owner)?, u128::MAX);

    let store = OnDiskStateStore::new(&db)?;
    assert_eq!(store.held()?, fraction(1, 10));
    assert_eq!(store.roster_at(0)?, Some(alice));
    Ok(())
  }
}
