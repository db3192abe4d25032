pub mod container;
pub mod error;
pub mod types;

pub use container::{ContainerDriver, RealContainerDriver};
pub use error::ContainerError;
pub use types::{ContainerOutput, RunContainerRequest, TurnUsage};
