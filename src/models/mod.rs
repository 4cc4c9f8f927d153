pub mod event;
pub mod program;
pub mod session;

pub use event::{ProcessEvent, SnapshotEntry};
pub use program::{InstanceChange, Program, UNKNOWN_DESCRIPTION};
pub use session::{InstanceSession, UsageSession};
