// Points ledger
//
// Shopper balances, lifetime totals and the journal of every movement. Credits
// re-classify the tier in the same unit as the balance change; debits are
// conditional updates that never take a balance below zero.

pub mod error;
pub mod models;
pub mod service;

pub use error::*;
pub use models::*;
pub use service::*;
