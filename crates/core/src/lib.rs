#![warn(clippy::unwrap_used)]

pub mod clock;
pub mod config;
pub mod delay;
pub mod error;
pub mod event_bus;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use delay::compute_due_at;
pub use error::{DripError, DripResult};
