pub mod capability;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod stage;
pub mod state;

pub use capability::Capabilities;
pub use config::EngineConfig;
pub use engine::{Decision, Engine, RunHandle, RunOutcome, RunRequest};
pub use errors::{CapabilityError, EngineError, FailureKind, FailureReport, WorkflowError};
pub use stage::{StageConfig, StageDefinition};
pub use state::{StateView, WorkflowState};
