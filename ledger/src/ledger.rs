use {
  crate::{Payout, PayoutError, SettlementError, State, StateDiff, StorageError},
  fundme_oracle::{Error as OracleError, PriceOracle, PriceSource},
  fundme_primitives::{units, Address, Amount},
  parking_lot::Mutex,
  serde::{Deserialize, Serialize},
  std::collections::BTreeMap,
  thiserror::Error,
  tracing::{info, warn},
};

/// Contributions must be worth more than this in the reference currency.
pub const MINIMUM_USD: Amount = units(5);

#[derive(Debug, Error)]
pub enum Error {
  #[error("Contribution worth {value} is not above the minimum of {minimum}")]
  InsufficientContribution { value: Amount, minimum: Amount },

  #[error("{0} is not the owner of this ledger")]
  NotOwner(Address),

  #[error("Payout to the owner failed: {0}")]
  TransferFailed(#[from] PayoutError),

  #[error("Price oracle unavailable: {0}")]
  OracleUnavailable(OracleError),

  #[error("Roster index {index} is out of range, roster has {len} entries")]
  IndexOutOfRange { index: usize, len: usize },

  #[error("Arithmetic overflow")]
  Overflow,

  #[error("Store belongs to {stored}, refusing to open it for {requested}")]
  OwnerMismatch { stored: Address, requested: Address },

  #[error("Storage error: {0}")]
  Storage(#[from] StorageError),
}

impl From<OracleError> for Error {
  fn from(value: OracleError) -> Self {
    match value {
      OracleError::Overflow => Error::Overflow,
      other => Error::OracleUnavailable(other),
    }
  }
}

impl From<SettlementError> for Error {
  fn from(value: SettlementError) -> Self {
    match value {
      SettlementError::Storage(e) => Error::Storage(e),
      SettlementError::Payout(e) => Error::TransferFailed(e),
    }
  }
}

/// Point in time view of all ledger records reachable from the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
  pub owner: Address,
  pub held: Amount,
  pub roster: Vec<Address>,
  pub contributions: BTreeMap<Address, Amount>,
}

/// Price-gated funding ledger.
///
/// Anyone may contribute as long as the contributed amount is worth
/// more than [`MINIMUM_USD`] in the reference currency, at the price
/// reported by the oracle at the time of the contribution. Only the
/// owner may withdraw, and a withdrawal always sweeps the entire held
/// balance and resets all contributor records.
///
/// All operations on one ledger instance are serialized through a
/// single lock around its state store, so every operation observes
/// and leaves behind a consistent state.
pub struct FundingLedger<S, P, F>
where
  S: State,
  P: Payout,
  F: PriceSource,
{
  owner: Address,
  oracle: PriceOracle<F>,
  payout: P,
  state: Mutex<S>,
}

impl<S, P, F> FundingLedger<S, P, F>
where
  S: State,
  P: Payout,
  F: PriceSource,
{
  /// Opens a ledger on top of a state store.
  ///
  /// An empty store gets `owner` recorded as its owner. A store that
  /// already has an owner can only be reopened by that same owner,
  /// the owner of a ledger never changes once recorded.
  pub fn open(
    owner: Address,
    oracle: PriceOracle<F>,
    mut store: S,
    payout: P,
  ) -> Result<Self, Error> {
    match store.owner()? {
      Some(stored) if stored != owner => {
        return Err(Error::OwnerMismatch {
          stored,
          requested: owner,
        });
      }
      Some(_) => {
        info!(
          "reopened ledger owned by {owner} holding {} with {} roster entries",
          store.held()?,
          store.roster_len()?
        );
      }
      None => {
        let mut genesis = StateDiff::default();
        genesis.set_owner(owner);
        store.apply(genesis)?;
        info!("created new ledger owned by {owner}");
      }
    }

    Ok(Self {
      owner,
      oracle,
      payout,
      state: Mutex::new(store),
    })
  }

  /// Records a contribution of `amount` made by `caller`.
  ///
  /// Fails without changing anything if the contribution is not worth
  /// more than [`MINIMUM_USD`] or if its worth cannot be established.
  /// Repeated contributions accumulate.
  pub fn contribute(&self, caller: Address, amount: Amount) -> Result<(), Error> {
    let value = self.oracle.convert(amount).map_err(|e| {
      warn!("could not price contribution of {amount} from {caller}: {e}");
      Error::from(e)
    })?;

    if value <= MINIMUM_USD {
      warn!("rejected contribution of {amount} from {caller} worth {value}");
      return Err(Error::InsufficientContribution {
        value,
        minimum: MINIMUM_USD,
      });
    }

    let mut state = self.state.lock();
    let recorded = state.contribution(&caller)?;
    let held = state.held()?;

    let mut diff = StateDiff::default();
    diff.set_contribution(
      caller,
      recorded.checked_add(amount).ok_or(Error::Overflow)?,
    );
    diff.push_contributor(caller);
    diff.set_held(held.checked_add(amount).ok_or(Error::Overflow)?);
    state.apply(diff)?;

    info!("accepted contribution of {amount} from {caller} worth {value}");
    Ok(())
  }

  /// Sends the entire held balance to the owner and resets all records.
  ///
  /// The reset and the payout are committed as one unit by the state
  /// store. If either of them fails the ledger is left exactly as it
  /// was and nothing is paid out.
  ///
  /// Returns the amount paid out to the owner.
  pub fn withdraw(&self, caller: Address) -> Result<Amount, Error> {
    if caller != self.owner {
      warn!("rejected withdrawal attempt by {caller}");
      return Err(Error::NotOwner(caller));
    }

    let mut state = self.state.lock();
    let amount = state.held()?;

    // every roster entry is visited, duplicates included
    let mut reset = StateDiff::default();
    let mut undo = StateDiff::default();
    undo.clear_roster();
    for index in 0..state.roster_len()? {
      let contributor =
        state.roster_at(index)?.ok_or_else(|| StorageError::Corrupt {
          key: format!("roster/{index}"),
          reason: "missing roster entry".into(),
        })?;
      reset.set_contribution(contributor, 0);
      undo.set_contribution(contributor, state.contribution(&contributor)?);
      undo.push_contributor(contributor);
    }
    reset.clear_roster();
    reset.set_held(0);
    undo.set_held(amount);

    state
      .apply_with_payout(reset, undo, &self.payout, &self.owner, amount)
      .map_err(|e| {
        warn!("withdrawal of {amount} to {} failed: {e}", self.owner);
        Error::from(e)
      })?;

    info!("withdrew {amount} to {}", self.owner);
    Ok(amount)
  }

  /// Cumulative amount contributed by an address since the last withdrawal.
  pub fn contribution_of(&self, contributor: &Address) -> Result<Amount, Error> {
    Ok(self.state.lock().contribution(contributor)?)
  }

  pub fn contributor_at(&self, index: usize) -> Result<Address, Error> {
    let state = self.state.lock();
    let len = state.roster_len()?;
    if index >= len {
      return Err(Error::IndexOutOfRange { index, len });
    }
    state.roster_at(index)?.ok_or_else(|| {
      Error::Storage(StorageError::Corrupt {
        key: format!("roster/{index}"),
        reason: "missing roster entry".into(),
      })
    })
  }

  pub fn contributors_len(&self) -> Result<usize, Error> {
    Ok(self.state.lock().roster_len()?)
  }

  /// Total balance currently held by the ledger.
  pub fn held(&self) -> Result<Amount, Error> {
    Ok(self.state.lock().held()?)
  }

  pub fn owner(&self) -> Address {
    self.owner
  }

  pub fn oracle(&self) -> &PriceOracle<F> {
    &self.oracle
  }

  pub fn price_source_version(&self) -> u64 {
    self.oracle.source_version()
  }

  pub fn snapshot(&self) -> Result<LedgerSnapshot, Error> {
    let state = self.state.lock();
    let mut roster = Vec::new();
    let mut contributions = BTreeMap::new();
    for index in 0..state.roster_len()? {
      if let Some(contributor) = state.roster_at(index)? {
        contributions.insert(contributor, state.contribution(&contributor)?);
        roster.push(contributor);
      }
    }

    Ok(LedgerSnapshot {
      owner: self.owner,
      held: state.held()?,
      roster,
      contributions,
    })
  }
}
