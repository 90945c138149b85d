//! Migration engine: legacy graph access, destination store, shared state
//! and the step driver. The per-entity steps live in `crate::steps`.

pub mod broker;
pub mod codec;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod files;
pub mod graph;
pub mod logger;
pub mod migration;
pub mod namespace;
pub mod pipeline;
pub mod principal;
pub mod refs;
pub mod schemas;
pub mod state;
pub mod text;
pub mod time;
pub mod tui;
