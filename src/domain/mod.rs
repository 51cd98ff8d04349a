//! Data domains and the provider contract
//!
//! A domain is an independently exportable slice of application data
//! (profiles, communication libraries, messages, symbol sets, analytics,
//! settings). The engine never looks inside a domain's records; each domain
//! is owned by a `DomainProvider` that exports and atomically applies them.

mod provider;
mod record_set;

pub use provider::{DomainError, DomainProvider, DomainRegistry};
pub use record_set::{DomainId, RecordSet};
