//! Session store: registry plus JSON record persistence.

mod persist;
mod registry;

pub use persist::RecordDir;
pub use registry::{SessionStore, Transition};
