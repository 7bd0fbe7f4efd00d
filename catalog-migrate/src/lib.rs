//! Dependency-ordered, idempotent loading of staged product catalog data

pub mod api;
pub mod config;
pub mod schema;
pub mod transfer;
