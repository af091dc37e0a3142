//! Async child-process runner used for every multiplexer invocation.

mod spawn;

pub use spawn::{is_not_found, spawn_process, ProcessOptions, ProcessResult};
