pub mod error;
pub mod fingerprint;
pub mod models;
pub mod quality;
pub mod settlement;
pub mod status_machine;

pub use error::*;
pub use fingerprint::*;
pub use models::*;
pub use quality::*;
pub use settlement::*;
pub use status_machine::*;
