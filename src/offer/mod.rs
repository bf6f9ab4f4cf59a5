mod builder;
mod offer;
mod registry;

pub use builder::*;
pub use offer::*;
pub use registry::*;
