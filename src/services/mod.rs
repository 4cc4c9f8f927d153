pub mod lookup;
pub mod metadata;
pub mod process_checker;
pub mod recorder;
pub mod recorder_handle;
pub mod unresolved;
pub mod watcher;

pub use lookup::ProcessSnapshotProvider;
pub use metadata::FileDescriptionResolver;
pub use process_checker::{ProcessFilter, SysinfoProvider};
pub use recorder::ProgramRecorder;
pub use recorder_handle::RecorderHandle;
pub use watcher::ProcessWatcher;
