// Reward catalog and redemption
//
// The catalog is owned by reward administration and only read here. A
// redemption spends points and one unit of stock in a single store commit.

pub mod error;
pub mod models;
pub mod redemption;

pub use error::*;
pub use models::*;
pub use redemption::*;
