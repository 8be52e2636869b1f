// Brand rules, points pricing and tier classification
//
// Everything here is pure except the brand rule cache, which snapshots the
// administration-owned rule table for a bounded time.

pub mod brand_cache;
pub mod calculator;
pub mod tier;
pub mod types;

pub use brand_cache::*;
pub use calculator::*;
pub use tier::*;
pub use types::*;
