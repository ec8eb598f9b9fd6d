//! Utility functions and types.

mod digest;
mod env;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use digest::*;
pub use env::*;
