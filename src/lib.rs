//! Price dashboard library
//!
//! Exposes the query cache, refresh cooldown, API client and view state so the
//! binary and the integration tests share them.

pub mod app;
pub mod cache;
pub mod cli;
pub mod data;
pub mod format;
pub mod logging;
pub mod refresh;
pub mod ui;
