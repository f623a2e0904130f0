//! Domain model (IDs, task records, states, outcomes, decisions, errors).

pub mod dead_letter;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod submit;
pub mod task;

pub use dead_letter::DeadLetterEntry;
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, SpindleError, StoreError};
pub use ids::{ParseIdError, TaskId};
pub use outcome::{FailureKind, HandlerError, Outcome};
pub use state::TaskState;
pub use submit::{DEFAULT_QUEUE, SubmitOptions, TaskHandle};
pub use task::{TaskRecord, TaskType};
