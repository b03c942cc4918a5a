//! REST API module for probes and metrics
//!
//! Serves `/health` for liveness probes and `/metrics` for Prometheus.

mod handlers;
mod server;

pub use server::{run_server, DEFAULT_PORT};
