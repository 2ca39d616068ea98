//! HTTP/WS presentation surface
//!
//! Thin read-only glue over the feed session: the core never depends on
//! anything in here.

pub mod routes;

pub use routes::{router, AppState};
