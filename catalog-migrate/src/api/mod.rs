//! Target store access
//!
//! The load engine only talks to a store through [`TargetStoreClient`].
//! [`MemoryStore`] keeps everything in process (dry runs, tests);
//! [`salesforce::SalesforceClient`] talks to a live org.

pub mod client;
pub mod memory;
pub mod salesforce;

pub use client::{RecordResult, TargetStoreClient};
pub use memory::{MemoryStore, StoreCall, StoredRecord};
pub use salesforce::{SalesforceClient, SalesforceConfig};
