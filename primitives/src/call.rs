use {
  crate::Amount,
  serde::{Deserialize, Serialize},
};

/// A request sent to the funding ledger by some caller.
///
/// Value can reach the ledger through three entrypoints. An explicit
/// funding call, a bare value transfer with no data attached, and a
/// value transfer carrying data that the ledger does not recognize.
/// All three carry the same semantics and go through the same
/// validation, there is no way to add value to the ledger that
/// bypasses the minimum contribution check or record keeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
  /// Explicit contribution.
  Fund { amount: Amount },

  /// Plain value transfer without any calldata.
  Receive { amount: Amount },

  /// Value transfer with calldata that matches no known entrypoint.
  Fallback { amount: Amount, data: Vec<u8> },

  /// Sweeps all held funds to the owner.
  Withdraw,
}

impl Call {
  /// Value attached to the call, zero for calls that carry no value.
  pub fn value(&self) -> Amount {
    match self {
      Call::Fund { amount }
      | Call::Receive { amount }
      | Call::Fallback { amount, .. } => *amount,
      Call::Withdraw => 0,
    }
  }
}
