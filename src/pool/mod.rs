//! Memory pool management
//!
//! Slot allocators backing the per-loop connection bookkeeping.

mod slab;

pub use slab::{Slab, SlabHandle};
