//! Polling helpers for asynchronous operations of the HuaweiCloud APIs.
//!
//! A mutating request usually returns before the resource is ready.
//! [StateChangeConf] polls a [StateRefresh] until the resource reaches a target state,
//! [RetryWithWaitForState] re-issues a request rejected because another operation is running.

pub mod refresh;
pub mod retry;
pub mod state_change;

pub use refresh::{Refreshed, StateRefresh, DELETED};
pub use retry::{handle_multi_operations_error, ConflictCode, RetryWithWaitForState};
pub use state_change::StateChangeConf;
