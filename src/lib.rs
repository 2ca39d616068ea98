//! tokenfeed backend library
//!
//! Exposes core modules for use by the binary and integration tests.

pub mod api;
pub mod chain;
pub mod feed;
pub mod models;
