//! remote.rs
//! Client side of the capability contract: read a signal from, or push a
//! signal to, a service another asset offers. The endpoint is whatever the
//! directory lookup produced; here it is an opaque URL.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time;

use crate::asset::Signal;
use crate::error::RemoteError;
use crate::owner::AssetHandle;

#[async_trait]
pub trait RemoteService: Send + Sync {
    fn definition(&self) -> &str;

    async fn read(&self) -> Result<Signal, RemoteError>;

    async fn write(&self, signal: &Signal) -> Result<(), RemoteError>;
}

/// Service of another process, reached over HTTP with the signal form as JSON.
pub struct HttpService {
    definition: String,
    url: String,
    client: reqwest::Client,
    limit: Duration,
}

impl HttpService {
    pub fn new(definition: &str, url: &str, client: reqwest::Client, limit: Duration) -> Self {
        Self {
            definition: definition.to_string(),
            url: url.to_string(),
            client,
            limit,
        }
    }

    fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(RemoteError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl RemoteService for HttpService {
    fn definition(&self) -> &str {
        &self.definition
    }

    async fn read(&self) -> Result<Signal, RemoteError> {
        let call = async {
            let response = self.client.get(&self.url).send().await?;
            let signal = self.check(response)?.json::<Signal>().await?;
            Ok::<_, RemoteError>(signal)
        };
        time::timeout(self.limit, call)
            .await
            .map_err(|_| RemoteError::Timeout(self.limit))?
    }

    async fn write(&self, signal: &Signal) -> Result<(), RemoteError> {
        debug!("PUT {} <- {:.2} {}", self.url, signal.value, signal.unit);
        let call = async {
            let response = self.client.put(&self.url).json(signal).send().await?;
            self.check(response)?;
            Ok::<_, RemoteError>(())
        };
        time::timeout(self.limit, call)
            .await
            .map_err(|_| RemoteError::Timeout(self.limit))?
    }
}

/// Service offered by an asset of this same process, reached through its
/// mailbox instead of the network.
pub struct LocalService {
    definition: String,
    handle: AssetHandle,
    sub_path: String,
    limit: Duration,
}

impl LocalService {
    pub fn new(definition: &str, handle: AssetHandle, sub_path: &str, limit: Duration) -> Self {
        Self {
            definition: definition.to_string(),
            handle,
            sub_path: sub_path.to_string(),
            limit,
        }
    }
}

#[async_trait]
impl RemoteService for LocalService {
    fn definition(&self) -> &str {
        &self.definition
    }

    async fn read(&self) -> Result<Signal, RemoteError> {
        Ok(self.handle.read(&self.sub_path, self.limit).await?)
    }

    async fn write(&self, signal: &Signal) -> Result<(), RemoteError> {
        self.handle
            .write(&self.sub_path, signal.clone(), self.limit)
            .await?;
        Ok(())
    }
}

/// `local://<asset>/<sub_path>` → `(asset, sub_path)`.
pub fn parse_local_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("local://")?;
    let (asset, sub_path) = rest.split_once('/')?;
    (!asset.is_empty() && !sub_path.is_empty()).then_some((asset, sub_path))
}
