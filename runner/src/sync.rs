pub mod coordinator;
pub mod sticky;

pub use coordinator::{Coordinator, CoordinatorError};
pub use sticky::{FileSticky, MemorySticky, StickyError, StickyFormat, StickyStore};

#[cfg(test)]
mod coordinator_test;
