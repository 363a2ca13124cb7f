//! Reportflow Library
//!
//! Scheduled report generation and reliable delivery: a periodic dispatcher
//! discovers due report schedules, a distribution condition decides whether
//! each one should be sent this cycle, and a delivery tracker drives every
//! send attempt through retry with bounded backoff to a terminal state.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod daemon;
pub mod db;
pub mod delivery;
pub mod error;
pub mod logger;
pub mod models;
pub mod repositories;
pub mod scheduling;
pub mod schema;
pub mod services;
pub mod state;

pub use state::AppState;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
