//! Streaming query modules.
//!
//! - `frame`: line reassembly and frame classification.
//! - `engine`: the decode loop, callback mode and table collection.
//! - `subscription`: task-backed event channel with cancellation.

/// Line splitting and frame types.
pub mod frame;
/// Decode loop and the callback/table consumers.
pub mod engine;
/// Background query task and its event channel.
pub mod subscription;

pub use engine::{QueryCallbacks, QueryRequest, QueryTable, DELIMITED_MEDIA_TYPE};
pub use frame::{parse_frame, Frame, QueryHeader};
pub use subscription::{QueryEvent, QuerySubscription};
