#![warn(clippy::unwrap_used)]

pub mod drip_rest;
pub mod rest;
pub mod server;

pub use server::{build_router, ApiServer};
