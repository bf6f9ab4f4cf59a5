pub mod collaborator;
pub mod common;
pub mod contract;
pub mod deposit;
pub mod manager;
pub mod message;
pub mod offer;
pub mod testing;
pub mod trade;
