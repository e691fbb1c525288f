//! Ledger module containing the account directory, costing, posting,
//! journal storage and reporting

pub mod account;
pub mod aggregate;
pub mod core;
pub mod costing;
pub mod journal;
pub mod posting;

pub use account::*;
pub use aggregate::*;
pub use self::core::*;
pub use costing::*;
pub use journal::*;
pub use posting::*;
