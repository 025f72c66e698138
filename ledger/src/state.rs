use {
  crate::{Payout, SettlementError},
  fundme_primitives::{Address, Amount},
  serde::{Deserialize, Serialize},
  std::collections::{BTreeMap, HashMap},
  thiserror::Error,
  tracing::error,
};

#[derive(Debug, Clone, Error)]
pub enum StorageError {
  #[error("Storage IO error: {0}")]
  Io(String),

  #[error("Corrupt record under key '{key}': {reason}")]
  Corrupt { key: String, reason: String },
}

/// Represents a change in the ledger state.
///
/// Every mutation of the ledger is first staged as a state diff against
/// the current state and then applied in one step by a [`State`]
/// implementation. State stores are expected to apply a diff atomically,
/// either all of its changes become visible or none of them.
///
/// Diffs are meant to be accumulated, applying two diffs one after
/// another is equivalent to applying their [`StateDiff::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
  owner: Option<Address>,
  contributions: BTreeMap<Address, Amount>,
  clear_roster: bool,
  roster: Vec<Address>,
  held: Option<Amount>,
}

impl StateDiff {
  /// Records the ledger owner.
  ///
  /// Returns the owner previously recorded in this diff, if any.
  pub fn set_owner(&mut self, owner: Address) -> Option<Address> {
    self.owner.replace(owner)
  }

  /// Sets the cumulative contribution of an address.
  ///
  /// If the diff already had a value for this address then
  /// the old value is returned, otherwise `None` is returned.
  pub fn set_contribution(
    &mut self,
    contributor: Address,
    amount: Amount,
  ) -> Option<Amount> {
    self.contributions.insert(contributor, amount)
  }

  /// Appends an address at the end of the roster.
  pub fn push_contributor(&mut self, contributor: Address) {
    self.roster.push(contributor);
  }

  /// Empties the roster, including anything pushed earlier into this diff.
  pub fn clear_roster(&mut self) {
    self.clear_roster = true;
    self.roster.clear();
  }

  /// Sets the total balance held by the ledger.
  pub fn set_held(&mut self, amount: Amount) -> Option<Amount> {
    self.held.replace(amount)
  }

  /// Merges a state diff with a newer diff.
  ///
  /// Applying the resulting diff is equivalent to
  /// applying the two merged diffs consecutively on
  /// any state store.
  pub fn merge(self, newer: StateDiff) -> StateDiff {
    let mut contributions = self.contributions;
    contributions.extend(newer.contributions);

    let (clear_roster, roster) = if newer.clear_roster {
      (true, newer.roster)
    } else {
      let mut roster = self.roster;
      roster.extend(newer.roster);
      (self.clear_roster, roster)
    };

    StateDiff {
      owner: newer.owner.or(self.owner),
      contributions,
      clear_roster,
      roster,
      held: newer.held.or(self.held),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.owner.is_none()
      && self.contributions.is_empty()
      && !self.clear_roster
      && self.roster.is_empty()
      && self.held.is_none()
  }

  pub fn owner_change(&self) -> Option<&Address> {
    self.owner.as_ref()
  }

  /// All contribution records changed by this diff.
  pub fn contributions(&self) -> impl Iterator<Item = (&Address, &Amount)> {
    self.contributions.iter()
  }

  /// True if the roster has to be emptied before
  /// appending [`StateDiff::appended`] entries.
  pub fn clears_roster(&self) -> bool {
    self.clear_roster
  }

  /// Roster entries appended by this diff, in order.
  pub fn appended(&self) -> &[Address] {
    &self.roster
  }

  pub fn held_change(&self) -> Option<Amount> {
    self.held
  }
}

impl State for StateDiff {
  fn owner(&self) -> Result<Option<Address>, StorageError> {
    Ok(self.owner)
  }

  fn contribution(&self, contributor: &Address) -> Result<Amount, StorageError> {
    Ok(self.contributions.get(contributor).copied().unwrap_or_default())
  }

  fn roster_len(&self) -> Result<usize, StorageError> {
    Ok(self.roster.len())
  }

  fn roster_at(&self, index: usize) -> Result<Option<Address>, StorageError> {
    Ok(self.roster.get(index).copied())
  }

  fn held(&self) -> Result<Amount, StorageError> {
    Ok(self.held.unwrap_or_default())
  }

  fn apply(&mut self, diff: StateDiff) -> Result<(), StorageError> {
    *self = std::mem::take(self).merge(diff);
    Ok(())
  }
}

/// Storage of the ledger records.
///
/// Reads of contributors that were never seen return zero. Reads are
/// fallible because persistent stores may hit IO errors or corrupt
/// records, in which case the operation that triggered the read fails.
pub trait State {
  fn owner(&self) -> Result<Option<Address>, StorageError>;
  fn contribution(&self, contributor: &Address) -> Result<Amount, StorageError>;
  fn roster_len(&self) -> Result<usize, StorageError>;
  fn roster_at(&self, index: usize) -> Result<Option<Address>, StorageError>;
  fn held(&self) -> Result<Amount, StorageError>;
  fn apply(&mut self, diff: StateDiff) -> Result<(), StorageError>;

  /// Applies `diff` and pays `amount` out to `to` as one unit, either
  /// both take effect or neither does.
  ///
  /// The default applies `diff` first and then transfers through
  /// `payout`. A refused transfer is rolled back by applying `undo`,
  /// which must restore every record touched by `diff`. Stores that
  /// keep payout balances in their own database override this and
  /// commit both in a single transaction.
  fn apply_with_payout(
    &mut self,
    diff: StateDiff,
    undo: StateDiff,
    payout: &dyn Payout,
    to: &Address,
    amount: Amount,
  ) -> Result<(), SettlementError> {
    self.apply(diff)?;
    if let Err(e) = payout.transfer(to, amount) {
      if let Err(restore) = self.apply(undo) {
        error!(
          "payout of {amount} to {to} failed ({e}) and the records it \
           cleared could not be restored: {restore}"
        );
        return Err(restore.into());
      }
      return Err(e.into());
    }
    Ok(())
  }
}

impl<T: State + ?Sized> State for Box<T> {
  fn owner(&self) -> Result<Option<Address>, StorageError> {
    (**self).owner()
  }

  fn contribution(&self, contributor: &Address) -> Result<Amount, StorageError> {
    (**self).contribution(contributor)
  }

  fn roster_len(&self) -> Result<usize, StorageError> {
    (**self).roster_len()
  }

  fn roster_at(&self, index: usize) -> Result<Option<Address>, StorageError> {
    (**self).roster_at(index)
  }

  fn held(&self) -> Result<Amount, StorageError> {
    (**self).held()
  }

  fn apply(&mut self, diff: StateDiff) -> Result<(), StorageError> {
    (**self).apply(diff)
  }

  fn apply_with_payout(
    &mut self,
    diff: StateDiff,
    undo: StateDiff,
    payout: &dyn Payout,
    to: &Address,
    amount: Amount,
  ) -> Result<(), SettlementError> {
    (**self).apply_with_payout(diff, undo, payout, to, amount)
  }
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
  owner: Option<Address>,
  contributions: HashMap<Address, Amount>,
  roster: Vec<Address>,
  held: Amount,
}

impl InMemoryStateStore {
  pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
    self.contributions.iter()
  }

  pub fn roster(&self) -> &[Address] {
    &self.roster
  }
}

impl State for InMemoryStateStore {
  fn owner(&self) -> Result<Option<Address>, StorageError> {
    Ok(self.owner)
  }

  fn contribution(&self, contributor: &Address) -> Result<Amount, StorageError> {
    Ok(self.contributions.get(contributor).copied().unwrap_or_default())
  }

  fn roster_len(&self) -> Result<usize, StorageError> {
    Ok(self.roster.len())
  }

  fn roster_at(&self, index: usize) -> Result<Option<Address>, StorageError> {
    Ok(self.roster.get(index).copied())
  }

  fn held(&self) -> Result<Amount, StorageError> {
    Ok(self.held)
  }

  fn apply(&mut self, diff: StateDiff) -> Result<(), StorageError> {
    if let Some(owner) = diff.owner {
      self.owner = Some(owner);
    }

    for (addr, amount) in diff.contributions {
      self.contributions.insert(addr, amount);
    }

    if diff.clear_roster {
      self.roster.clear();
    }
    self.roster.extend(diff.roster);

    if let Some(held) = diff.held {
      self.held = held;
    }

    Ok(())
  }
}
