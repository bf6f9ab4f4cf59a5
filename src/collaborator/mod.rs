pub mod transport;
pub mod wallet;
pub mod witness;
