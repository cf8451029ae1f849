//! Multi-key bisection over byte-addressable content, and the sorted index
//! format it drives.
//!
//! # Architecture
//!
//! - [`bisect_multi`]: parallel binary search for many keys at once. Each
//!   round hands every still-active `(offset, key)` probe to one lookup
//!   call, so a reader can satisfy a whole round with one I/O pass.
//! - [`SortedIndexBuilder`]: writes a line-oriented index of sorted records.
//! - [`SortedIndex`]: memory-maps an index file and answers bisection probes
//!   without parsing the whole file.

pub mod bisect;
pub mod error;
pub mod sorted;

pub use bisect::{bisect_multi, Probe};
pub use error::{IndexError, IndexResult};
pub use sorted::{SortedIndex, SortedIndexBuilder};
