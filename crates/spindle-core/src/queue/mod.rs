//! Queue module: ready lanes, schedule index and retry policy.

pub mod retry;
pub mod router;
pub mod schedule;

pub use retry::RetryPolicy;
pub use router::{QueueRouter, Ready};
pub use schedule::{ScheduleIndex, ScheduledEntry};
