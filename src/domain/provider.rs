//! The contract every data domain implements, and the registry holding them

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::record_set::{DomainId, RecordSet};

/// Failure reported by a domain provider
///
/// The engine wraps it into `BackupError::Export` or `BackupError::Apply`
/// together with the domain that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DomainError(pub String);

impl DomainError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One independently exportable and importable slice of application data
pub trait DomainProvider: Send + Sync {
    /// Which domain this provider owns
    fn domain(&self) -> DomainId;

    /// Export every record of the domain
    fn export(&self) -> Result<RecordSet, DomainError>;

    /// Replace the domain's live records with `records`, all or nothing
    ///
    /// Returns the records that were live before the call so that the caller
    /// can roll back by applying them again.
    fn apply_atomic(&self, records: RecordSet) -> Result<RecordSet, DomainError>;
}

/// Registered providers, keyed by domain
#[derive(Clone, Default)]
pub struct DomainRegistry {
    providers: BTreeMap<DomainId, Arc<dyn DomainProvider>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous provider for its domain
    pub fn register(&mut self, provider: Arc<dyn DomainProvider>) {
        self.providers.insert(provider.domain(), provider);
    }

    /// Builder-style register
    pub fn with(mut self, provider: Arc<dyn DomainProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, domain: DomainId) -> Option<&Arc<dyn DomainProvider>> {
        self.providers.get(&domain)
    }

    pub fn contains(&self, domain: DomainId) -> bool {
        self.providers.contains_key(&domain)
    }

    /// Registered domains in canonical order
    pub fn domains(&self) -> Vec<DomainId> {
        self.providers.keys().copied().collect()
    }
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}
