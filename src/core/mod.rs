//! Shared primitives: errors, configuration, persistence, and the cache layer.

pub mod broker;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod schemas;
pub mod store;
pub mod time;
