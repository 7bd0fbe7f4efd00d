//! Salesforce-style REST target
//!
//! Lookups run as SOQL queries over the natural key fields; creates and
//! updates go through the composite sobjects collection endpoint with
//! `allOrNone` off, so one bad record never sinks its chunk.

mod client;
pub mod models;
pub mod soql;

pub use client::{
    ACCESS_TOKEN_VAR, INSTANCE_URL_VAR, SalesforceClient, SalesforceConfig, chunk_ranges,
};
