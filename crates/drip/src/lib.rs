//! Drip campaign engine: enrolls recipients into timed message sequences,
//! advances them on a periodic schedule, and stops them when a stop
//! condition is met.
//!
//! - [`store`]: persistence boundary with guarded updates and claims
//! - [`enrollment`]: admits recipients
//! - [`executor`]: runs one step of one enrollment
//! - [`scheduler`]: periodic batch processor
//! - [`listener`]: response hook
//! - [`lifecycle`]: campaign start/pause/resume
//! - [`stats`]: per-campaign aggregates

#![warn(clippy::unwrap_used)]

pub mod engine;
pub mod enrollment;
pub mod executor;
pub mod lifecycle;
pub mod listener;
pub mod render;
pub mod scheduler;
pub mod stats;
pub mod store;

pub use engine::{DripEngine, DripEngineBuilder};
pub use executor::{StepExecutor, StepOutcome};
pub use scheduler::DripScheduler;
pub use store::{DripStore, InMemoryStore};
