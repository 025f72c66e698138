use {
  crate::StorageError,
  fundme_primitives::{Address, Amount},
  parking_lot::RwLock,
  std::{
    collections::{HashMap, HashSet},
    sync::Arc,
  },
  thiserror::Error,
};

#[derive(Debug, Clone, Error)]
pub enum PayoutError {
  #[error("Recipient {0} refused to accept funds")]
  Rejected(Address),

  #[error("Balance of {0} would overflow")]
  Overflow(Address),

  #[error("Transfer backend failure: {0}")]
  Backend(String),
}

/// Failure of a state change that is committed together with a payout.
#[derive(Debug, Clone, Error)]
pub enum SettlementError {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Payout(#[from] PayoutError),
}

/// Moves funds held by the ledger out to a recipient.
///
/// Implementations must either complete the transfer or fail
/// promptly without moving anything. A transfer must never hang
/// waiting on the recipient.
pub trait Payout: Send + Sync {
  fn transfer(&self, to: &Address, amount: Amount) -> Result<(), PayoutError>;
}

impl<P: Payout + ?Sized> Payout for Arc<P> {
  fn transfer(&self, to: &Address, amount: Amount) -> Result<(), PayoutError> {
    (**self).transfer(to, amount)
  }
}

/// Account balances kept in process memory.
///
/// Recipients can be marked as refusing deposits, which makes
/// transfers to them fail the same way a contract without a
/// payable entrypoint would.
#[derive(Debug, Default)]
pub struct InMemoryBank {
  inner: RwLock<BankState>,
}

#[derive(Debug, Default)]
struct BankState {
  balances: HashMap<Address, Amount>,
  rejecting: HashSet<Address>,
}

impl InMemoryBank {
  pub fn balance_of(&self, account: &Address) -> Amount {
    self
      .inner
      .read()
      .balances
      .get(account)
      .copied()
      .unwrap_or_default()
  }

  /// Makes all future transfers to `account` fail.
  pub fn reject_deposits_to(&self, account: Address) {
    self.inner.write().rejecting.insert(account);
  }

  pub fn accept_deposits_to(&self, account: &Address) {
    self.inner.write().rejecting.remove(account);
  }
}

impl Payout for InMemoryBank {
  fn transfer(&self, to: &Address, amount: Amount) -> Result<(), PayoutError> {
    let mut inner = self.inner.write();
    if inner.rejecting.contains(to) {
      return Err(PayoutError::Rejected(*to));
    }

    let balance = inner.balances.entry(*to).or_default();
    *balance = balance
      .checked_add(amount)
      .ok_or(PayoutError::Overflow(*to))?;
    Ok(())
  }
}
