// Library surface for headless/integration tests and reuse.
// Keep this lean to avoid coupling to bin-only types in main.rs.
pub mod app_dirs;
pub mod config;
pub mod deviation;
pub mod distance;
pub mod drill;
pub mod error;
pub mod runtime;
pub mod session;
pub mod shot;
pub mod source;
pub mod store;
pub mod tracker;
pub mod units;
pub mod util;
