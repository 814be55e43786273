#![forbid(unsafe_code)]

//! Idempotent job submission: requests are fingerprinted, reconciled against a live cache and a
//! SQLite store, and submitted to the backend at most once per fingerprint.

pub mod config;
pub mod engine;
pub mod http;
mod time;

pub use config::ServerConfig;
pub use engine::{Engine, EngineError};
pub use http::{HttpOptions, router};
pub use time::now_ms;
