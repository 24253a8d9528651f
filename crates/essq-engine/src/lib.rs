pub mod backend;
pub mod backends;
pub mod context;
pub mod controller;
pub mod error;
pub mod files;
pub mod job;
pub mod planner;
pub mod probe;
pub mod resources;
pub mod status;
pub mod submit;
pub mod trsh;

pub use backend::{Backend, BackendRegistry};
pub use context::EngineContext;
pub use controller::{ControlOptions, Controller, JobOutcome};
pub use error::{EngineError, Result};
pub use job::{Job, JobRecord};
