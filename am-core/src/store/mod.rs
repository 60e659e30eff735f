//! Directory store interface
//!
//! The shared device-directory database is an external collaborator; the
//! controller only needs query-by-filter, delete-by-filter (returning a
//! count), and a notes update. The trait keeps the transport swappable and
//! lets tests run against in-memory or mock stores. Other providers write to
//! the same collection concurrently, so nothing here assumes exclusive
//! ownership of a record.

mod http;

pub use http::HttpDirectoryStore;

use crate::data::DeviceRecord;
use crate::error::Result;

/// Filter applied to directory queries and mutations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub serial: Option<String>,
    pub provider: Option<String>,
}

impl DeviceFilter {
    pub fn serial(serial: impl Into<String>) -> Self {
        Self {
            serial: Some(serial.into()),
            provider: None,
        }
    }

    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            serial: None,
            provider: Some(provider.into()),
        }
    }

    pub fn and_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.serial.is_none() && self.provider.is_none()
    }

    /// Query-string pairs in stable order
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(ref serial) = self.serial {
            pairs.push(("serial", serial.clone()));
        }
        if let Some(ref provider) = self.provider {
            pairs.push(("provider", provider.clone()));
        }
        pairs
    }
}

/// Read/write contract the controller needs from the directory store
#[cfg_attr(test, mockall::automock)]
pub trait DirectoryStore: Send + Sync {
    /// Records matching the filter
    fn query(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>>;

    /// Delete matching records, returning the count removed.
    /// Zero deletions is a valid result, not an error.
    fn delete(&self, filter: &DeviceFilter) -> Result<u64>;

    /// Overwrite the notes field on matching records, returning the count
    /// modified. Overwrite semantics, so always idempotent.
    fn set_notes(&self, filter: &DeviceFilter, note: &str) -> Result<u64>;
}
