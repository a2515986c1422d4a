//! Listing engine framework
//!
//! - `engine`: single-use discovery state machine racing a timeout and an abort flag
//! - `dispatch`: FIFO queue that runs listener callbacks on the caller's context
//! - `filter`: keep predicates
//! - `sort`: sort orders and merge policies

mod dispatch;
mod engine;
mod filter;
mod listener;
mod sort;

pub use dispatch::{control_queue, ControlHandle, ControlQueue};
pub use engine::{ListingEngine, ListingOptions, ListingState};
pub use filter::{KeepPolicy, ListFilter};
pub use listener::ListingListener;
pub use sort::{arrange, MergePolicy, SortKey, SortOrder};
