//! Remote durable store for the relay document (settings + ledger + registry).
//!
//! The store speaks plain HTTP: GET returns the YAML document, PUT overwrites it.

use async_trait::async_trait;
use tracing::debug;

use crate::{errors::Error, state::StoreDocument, Result};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self) -> Result<StoreDocument>;
    async fn put(&self, doc: &StoreDocument) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct RemoteStore {
    url: String,
    http: reqwest::Client,
}

impl RemoteStore {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("store http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl DocumentStore for RemoteStore {
    /// Any failure here is a startup failure, hence `Error::Config`.
    async fn get(&self) -> Result<StoreDocument> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Config(format!("store GET {}: {e}", self.url)))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Config(format!("store response status {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Config(format!("store GET body: {e}")))?;
        let doc: StoreDocument = serde_yaml::from_str(&body)?;
        if doc.settings.debug {
            debug!(url = %self.url, bytes = body.len(), "store GET");
        }
        Ok(doc)
    }

    async fn put(&self, doc: &StoreDocument) -> Result<()> {
        let body = serde_yaml::to_string(doc)?;
        if doc.settings.debug {
            debug!(url = %self.url, bytes = body.len(), "store PUT");
        }

        let resp = self
            .http
            .put(&self.url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Store(format!("store PUT {}: {e}", self.url)))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Store(format!("store response status {status}")));
        }
        Ok(())
    }
}
