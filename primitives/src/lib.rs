mod address;
mod amount;
mod call;

pub use {
  address::{Address, Error as AddressError},
  amount::{fraction, units, Amount, DECIMALS, ONE},
  call::Call,
};
