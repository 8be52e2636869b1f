// Loyalty Ledger
//
// Points ledger and receipt settlement engine for the retail loyalty platform.
// Receipts photographed by shoppers are settled into point credits, credits drive
// tier promotions, and balances are spent against a finite reward catalog.
//
// Transport, authentication and uploads live outside this crate; callers hand the
// engine resolved shopper/agent identities and receive typed results.

pub mod attendance;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod notifications;
pub mod receipts;
pub mod rewards;
pub mod rules;
pub mod store;
pub mod validation;

pub use engine::LoyaltyEngine;
