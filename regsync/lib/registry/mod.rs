//! Registry API access for image sources and destinations.
//!
//! The [`ImageSource`] and [`ImageDestination`] traits describe the
//! operations the sync engine needs; [`HttpRegistryAdapter`] opens
//! implementations speaking the OCI distribution / Docker Registry HTTP
//! API v2, negotiating bearer tokens from `Www-Authenticate` challenges
//! and honoring per-credential `insecure` connections.

mod client;
mod destination;
mod source;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use client::*;
pub use destination::*;
pub use source::*;
pub use traits::*;
