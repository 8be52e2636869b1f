// Field agent attendance
//
// Daily clock-in/clock-out records with lateness detection. Shift dates and
// lateness are judged in site-local time.

pub mod error;
pub mod models;
pub mod service;

pub use error::*;
pub use models::*;
pub use service::*;
