pub mod error;
pub mod hosts;
pub mod registry;
pub mod scheduler;

pub use error::{ClientError, Result};
pub use hosts::{with_session, Host, RetryPolicy, Session};
pub use registry::{CompletedEntry, Registry, RegistryEntry};
pub use scheduler::{QueueState, Scheduler};
