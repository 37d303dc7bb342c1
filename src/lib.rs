#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "lock_api")]
mod locked;

#[cfg(feature = "counters")]
mod counters;

mod block;
mod error;
mod heap;
mod llist;
mod region;
mod tag;
mod utils;

pub use block::{required_block_size, Ptr, MIN_BLOCK_SIZE, TAGS_SIZE, TAG_SIZE};
#[cfg(feature = "counters")]
pub use counters::Counters;
pub use error::AllocError;
pub use heap::{BlockInfo, Blocks, Heap};
#[cfg(feature = "lock_api")]
pub use locked::Locked;
pub use region::{Region, SliceRegion, VecRegion};
pub use utils::{ALIGN, WORD_SIZE};
