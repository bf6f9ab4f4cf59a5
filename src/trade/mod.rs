mod data;
mod protocol;
mod state;
mod trade;

pub use state::*;
pub use trade::*;
