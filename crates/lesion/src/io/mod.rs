pub mod artifacts;
pub mod response;

pub use artifacts::*;
pub use response::*;
