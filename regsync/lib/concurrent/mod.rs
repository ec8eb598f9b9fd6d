//! Concurrency primitives shared by the scheduler and the task tree.
//!
//! Everything here is safe to share between workers behind an `Arc`:
//! a FIFO list of pending work, a (count, total) progress counter, the
//! wake-up channel workers park on when the list drains, and the ordered
//! map of successfully synchronized images.

mod broadcast;
mod counter;
mod image_list;
mod list;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use broadcast::*;
pub use counter::*;
pub use image_list::*;
pub use list::*;
