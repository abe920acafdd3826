//! The execution engine.
//!
//! - `retry`, `approval`, `rate_limit`: shared primitives
//! - `activities`: capability calls with timeouts and retries applied
//! - `orchestrator`, `refiner`, `parallel`: the three run shapes
//! - `registry`: the `Engine` control surface over run ids

pub mod activities;
pub mod approval;
pub mod orchestrator;
pub mod parallel;
pub mod rate_limit;
pub mod refiner;
pub mod registry;
pub mod retry;

pub use approval::{ApprovalDecision, ApprovalGate, Decision, GateTimeout};
pub use orchestrator::Orchestrator;
pub use parallel::{FeatureResult, ParallelDeveloper, branch_name};
pub use rate_limit::RateLimiter;
pub use refiner::{IterativeRefiner, RefinementSummary};
pub use registry::{Engine, RunHandle, RunOutcome, RunRequest};
pub use retry::RetryPolicy;
