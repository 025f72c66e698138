use {
  crate::{Error, FundingLedger, Payout, State},
  fundme_oracle::PriceSource,
  fundme_primitives::{Address, Amount, Call},
  serde::{Deserialize, Serialize},
  tracing::debug,
};

/// Effect of a successfully executed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
  Contributed { amount: Amount },
  Withdrawn { amount: Amount },
}

/// Executes a call on behalf of `caller`.
///
/// This is the single entrypoint for inbound value. Explicit funding
/// calls, bare value transfers and value transfers with unrecognized
/// calldata are all validated and recorded as contributions.
pub fn execute<S, P, F>(
  ledger: &FundingLedger<S, P, F>,
  caller: Address,
  call: Call,
) -> Result<Outcome, Error>
where
  S: State,
  P: Payout,
  F: PriceSource,
{
  match call {
    Call::Fund { amount } | Call::Receive { amount } => {
      ledger.contribute(caller, amount)?;
      Ok(Outcome::Contributed { amount })
    }
    Call::Fallback { amount, data } => {
      debug!(
        "routing {} bytes of unrecognized calldata from {caller} to contribute",
        data.len()
      );
      ledger.contribute(caller, amount)?;
      Ok(Outcome::Contributed { amount })
    }
    Call::Withdraw => ledger
      .withdraw(caller)
      .map(|amount| Outcome::Withdrawn { amount }),
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{execute, Outcome},
    crate::{Error, FundingLedger, InMemoryBank, InMemoryStateStore},
    fundme_oracle::{MockPriceFeed, OracleConfig, PriceOracle},
    fundme_primitives::{fraction, Address, Call},
  };

  #[test]
  fn every_value_entrypoint_is_gated() -> anyhow::Result<()> {
    let owner = Address::new([1; 32]);
    let alice = Address::new([2; 32]);
    let ledger = FundingLedger::open(
      owner,
      PriceOracle::new(
        MockPriceFeed::new(8, 2000_00000000),
        OracleConfig::default(),
      ),
      InMemoryStateStore::default(),
      InMemoryBank::default(),
    )?;

    // 0.0001 units are worth 0.2 in reference currency, below the minimum
    let dust = fraction(1, 10_000);
    for call in [
      Call::Fund { amount: dust },
      Call::Receive { amount: dust },
      Call::Fallback {
        amount: dust,
        data: b"\xde\xad\xbe\xef".to_vec(),
      },
    ] {
      assert!(matches!(
        execute(&ledger, alice, call),
        Err(Error::InsufficientContribution { .. })
      ));
    }
    assert_eq!(ledger.contributors_len()?, 0);

    let amount = fraction(1, 10);
    for call in [
      Call::Fund { amount },
      Call::Receive { amount },
      Call::Fallback {
        amount,
        data: vec![1, 2, 3],
      },
    ] {
      assert_eq!(
        execute(&ledger, alice, call)?,
        Outcome::Contributed { amount }
      );
    }

    assert_eq!(ledger.contributors_len()?, 3);
    assert_eq!(ledger.contribution_of(&alice)?, 3 * amount);

    assert!(matches!(
      execute(&ledger, alice, Call::Withdraw),
      Err(Error::NotOwner(_))
    ));
    assert_eq!(execute(&ledger, owner, Call::Withdraw)?, Outcome::Withdrawn {
      amount: 3 * amount
    });
    Ok(())
  }
}
