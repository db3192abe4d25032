pub mod error;
pub mod models;
pub mod store;

pub use error::StoreError;
pub use models::{Event, EventKind, Task, TaskStatus, Usage, Workspace};
pub use store::Store;
