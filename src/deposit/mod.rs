mod coordinator;
mod tx;

pub use coordinator::*;
pub use tx::*;
