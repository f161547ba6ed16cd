//! A minimal client for the etcd v2 keys API.
//!
//! Only the two operations needed to follow a single key are supported: reading the key's current
//! value and long-polling for its next change. Requests are spread over a list of cluster members;
//! a member that can't be reached is skipped in favor of the next one.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod watch;


pub use self::watch::Watcher;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;

/// A handle to an etcd cluster.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    endpoints: Arc<[String]>,
}

/// A key's value at a point in the store's history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,

    /// Deleted and expired keys have no value.
    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub modified_index: u64,
}

/// An error reported by an etcd member.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("etcd error {error_code}: {message} ({cause})")]
pub struct EtcdError {
    pub error_code: u64,
    pub message: String,
    #[serde(default)]
    pub cause: String,
    #[serde(default)]
    pub index: u64,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no etcd endpoints configured")]
    NoEndpoints,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned an empty response")]
    EmptyResponse { endpoint: String },

    #[error("{endpoint} returned an unexpected response: {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    #[error("{endpoint} returned an invalid response: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Etcd(#[from] EtcdError),

    #[error("all etcd endpoints failed: {}", join(.0))]
    Unavailable(Vec<Error>),
}

#[derive(Debug, Deserialize)]
struct Response {
    node: Node,
}

pub(crate) const KEY_NOT_FOUND: u64 = 100;

/// The watched index has been compacted away; the watch must restart from the present.
pub(crate) const EVENT_INDEX_CLEARED: u64 = 401;

// === impl Client ===

impl Client {
    pub fn new<I, S>(endpoints: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|e| e.into().trim_end_matches('/').to_string())
            .collect::<Arc<[String]>>();
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let http = reqwest::Client::builder().build().map_err(Error::Client)?;
        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Reads a key's current value, trying each endpoint in order.
    ///
    /// Each request is bounded by `timeout`. An error reported by etcd itself (e.g. a missing key)
    /// is returned immediately since every member would report the same.
    pub async fn get(&self, key: &str, timeout: Duration) -> Result<Node, Error> {
        let mut errors = Vec::new();
        for endpoint in self.endpoints.iter() {
            let rsp = self
                .http
                .get(key_url(endpoint, key))
                .timeout(timeout)
                .send()
                .await
                .map_err(|source| Error::Request {
                    endpoint: endpoint.clone(),
                    source,
                });

            let res = match rsp {
                Ok(rsp) => read_response(endpoint, rsp).await,
                Err(error) => Err(error),
            };
            match res {
                Ok(Some(Response { node })) => return Ok(node),
                Ok(None) => errors.push(Error::EmptyResponse {
                    endpoint: endpoint.clone(),
                }),
                Err(error @ Error::Etcd(_)) => return Err(error),
                Err(error) => {
                    debug!(%endpoint, %error, "Failed to read key");
                    errors.push(error);
                }
            }
        }
        Err(Error::Unavailable(errors))
    }

    /// Watches a key for changes made after `after_index`, or after the watch starts if no index
    /// is given.
    pub fn watch(&self, key: impl Into<String>, after_index: Option<u64>) -> Watcher {
        Watcher::new(self.clone(), key.into(), after_index)
    }
}

fn key_url(endpoint: &str, key: &str) -> String {
    format!("{endpoint}/v2/keys{key}")
}

/// Reads an etcd response, returning `None` if the body is empty.
async fn read_response(endpoint: &str, rsp: reqwest::Response) -> Result<Option<Response>, Error> {
    let status = rsp.status();
    let body = rsp.bytes().await.map_err(|source| Error::Request {
        endpoint: endpoint.to_string(),
        source,
    })?;
    if body.is_empty() {
        return Ok(None);
    }

    if status.is_success() {
        let rsp = serde_json::from_slice(&body).map_err(|source| Error::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;
        return Ok(Some(rsp));
    }

    match serde_json::from_slice::<EtcdError>(&body) {
        Ok(error) => Err(error.into()),
        Err(_) => Err(Error::Status {
            endpoint: endpoint.to_string(),
            status,
        }),
    }
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
