//! Domain model (ids, names, task records, invocations, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod invocation;
pub mod outcome;
pub mod record;
pub mod state;
pub mod task_name;

pub use errors::TaskError;
pub use ids::TaskId;
pub use invocation::{Arguments, Invocation, PARENT_TASK_ID_ARG, TASK_ID_ARG};
pub use outcome::AttemptOutcome;
pub use record::{NewTask, TaskKey, TaskRecord};
pub use state::{ParseStateError, Status, TaskResult};
pub use task_name::TaskName;
