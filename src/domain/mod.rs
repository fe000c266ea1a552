//! Domain types: the mutable [`TaskRecord`] and the shared [`Task`] handle.

pub mod record;
pub mod task;

pub use record::TaskRecord;
pub use task::{Completion, CompletionCallback, Task};
