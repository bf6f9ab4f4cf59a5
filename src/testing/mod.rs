//! Deterministic collaborator doubles and canned parameters for tests.

mod offer;
mod transport;
mod wallet;
mod witness;

pub use offer::*;
pub use transport::*;
pub use wallet::*;
pub use witness::*;
