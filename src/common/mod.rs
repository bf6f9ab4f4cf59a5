pub mod error;
pub mod persist;
pub mod types;
