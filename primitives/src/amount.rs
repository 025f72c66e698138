/// Quantity of the native asset expressed in its smallest unit.
///
/// The native asset has 18 decimal places, so `10^18` of those units
/// make up one whole unit of the asset. Values denominated in the
/// reference currency use the same 18 decimals scale.
pub type Amount = u128;

/// Number of decimal places of the native asset and reference currency.
pub const DECIMALS: u32 = 18;

/// One whole unit of the native asset (or reference currency).
pub const ONE: Amount = 10u128.pow(DECIMALS);

/// Expresses `whole` units of the native asset in its smallest unit.
pub const fn units(whole: u64) -> Amount {
  whole as Amount * ONE
}

/// Expresses a fraction of one unit of the native asset as `numerator /
/// denominator` in its smallest unit, e.g. `fraction(1, 10)` is `0.1`.
pub const fn fraction(numerator: u64, denominator: u64) -> Amount {
  numerator as Amount * ONE / denominator as Amount
}
