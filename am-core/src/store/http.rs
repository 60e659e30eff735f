//! JSON-over-HTTP directory store client
//!
//! Endpoints, with the device collection name in the path:
//! - `GET    /api/v1/<table>?serial=&provider=`  -> `[DeviceRecord]`
//! - `DELETE /api/v1/<table>?serial=&provider=`  -> `{"deleted": n}`
//! - `PATCH  /api/v1/<table>/notes`              -> `{"modified": n}`
//!
//! Auth is a bearer key when configured. Every request carries the
//! store-level timeout; connection-level failures map to the transient
//! `StoreConnection` variant so the executor's backoff applies.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{DeviceFilter, DirectoryStore};
use crate::data::config::DirectorySettings;
use crate::data::DeviceRecord;
use crate::error::{AdbmendError, Result};

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    deleted: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    modified: u64,
}

#[derive(Debug, Serialize)]
struct NotesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    serial: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    notes: &'a str,
}

/// Directory store client over HTTP
pub struct HttpDirectoryStore {
    client: reqwest::blocking::Client,
    collection_url: String,
    auth_key: Option<String>,
}

impl HttpDirectoryStore {
    pub fn new(settings: &DirectorySettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| AdbmendError::store(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            client,
            collection_url: collection_url(settings),
            auth_key: settings.auth_key.clone(),
        })
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match self.auth_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<T> {
        let response = self.authorize(request).send().map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdbmendError::store(format!(
                "store returned {}",
                status.as_u16()
            )));
        }
        response
            .json::<T>()
            .map_err(|e| AdbmendError::store(format!("decoding store response: {}", e)))
    }
}

/// URL of the device collection for the configured table
fn collection_url(settings: &DirectorySettings) -> String {
    format!("{}/api/v1/{}", settings.base_url(), settings.table)
}

fn map_reqwest_error(e: reqwest::Error) -> AdbmendError {
    if e.is_connect() || e.is_timeout() {
        AdbmendError::StoreConnection(e.to_string())
    } else {
        AdbmendError::store(e.to_string())
    }
}

impl DirectoryStore for HttpDirectoryStore {
    fn query(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>> {
        trace!(?filter, "directory query");
        self.send(
            self.client
                .get(&self.collection_url)
                .query(&filter.to_query()),
        )
    }

    fn delete(&self, filter: &DeviceFilter) -> Result<u64> {
        if filter.is_empty() {
            // A filterless delete would wipe the whole collection
            return Err(AdbmendError::store("refusing unfiltered delete"));
        }
        trace!(?filter, "directory delete");
        let response: DeleteResponse = self.send(
            self.client
                .delete(&self.collection_url)
                .query(&filter.to_query()),
        )?;
        Ok(response.deleted)
    }

    fn set_notes(&self, filter: &DeviceFilter, note: &str) -> Result<u64> {
        if filter.is_empty() {
            return Err(AdbmendError::store("refusing unfiltered notes update"));
        }
        trace!(?filter, "directory notes update");
        let body = NotesRequest {
            serial: filter.serial.as_deref(),
            provider: filter.provider.as_deref(),
            notes: note,
        };
        let response: UpdateResponse = self.send(
            self.client
                .patch(format!("{}/notes", self.collection_url))
                .json(&body),
        )?;
        Ok(response.modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_url_includes_table() {
        let settings = DirectorySettings {
            host: "db.example".to_string(),
            port: 7700,
            auth_key: None,
            table: "devices".to_string(),
            request_timeout_ms: 5_000,
        };
        assert_eq!(
            collection_url(&settings),
            "http://db.example:7700/api/v1/devices"
        );
    }

    #[test]
    fn empty_filter_mutations_are_refused() {
        let store = HttpDirectoryStore::new(&DirectorySettings::default()).unwrap();
        assert!(store.delete(&DeviceFilter::default()).is_err());
        assert!(store.set_notes(&DeviceFilter::default(), "x").is_err());
    }
}
