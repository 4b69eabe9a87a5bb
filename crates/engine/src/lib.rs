//! Automation engine binary support: service wiring and the HTTP surface.

pub mod app;
pub mod runtime;

pub use app::{AppState, build_app};
pub use runtime::{Engine, EngineError, connect_store};
