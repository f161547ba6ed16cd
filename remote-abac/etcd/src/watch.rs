use crate::{
    key_url, read_response, Client, Error, Node, Response, EVENT_INDEX_CLEARED, KEY_NOT_FOUND,
};
use std::time::Duration;
use tracing::{debug, trace};

/// Bounds the read that resynchronizes a watch whose history was compacted.
const RESYNC_TIMEOUT: Duration = Duration::from_secs(1);

/// Follows changes to a single key.
///
/// The watcher remembers the modification index of the last change it returned, so consecutive
/// calls to [`Watcher::next`] neither miss nor repeat a change.
#[derive(Debug)]
pub struct Watcher {
    client: Client,
    key: String,
    after_index: Option<u64>,
    endpoint: usize,
}

// === impl Watcher ===

impl Watcher {
    pub(crate) fn new(client: Client, key: String, after_index: Option<u64>) -> Self {
        Self {
            client,
            key,
            after_index,
            endpoint: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits until the key changes and returns its new state.
    ///
    /// This never returns without a change: a long poll that ends without an event is reissued.
    /// If etcd has already compacted the history after our index, the key is read directly and
    /// returned when it changed since our index. After a transport error, the next call uses the
    /// next endpoint.
    pub async fn next(&mut self) -> Result<Node, Error> {
        loop {
            let endpoint = self.client.endpoints[self.endpoint].clone();
            let mut url = format!("{}?wait=true", key_url(&endpoint, &self.key));
            if let Some(index) = self.after_index {
                url = format!("{url}&waitIndex={}", index + 1);
            }
            trace!(%url, "Waiting for change");

            let rsp = match self.client.http.get(&url).send().await {
                Ok(rsp) => read_response(&endpoint, rsp).await,
                Err(source) => Err(Error::Request {
                    endpoint: endpoint.clone(),
                    source,
                }),
            };

            match rsp {
                Ok(Some(Response { node })) => {
                    debug!(key = %node.key, index = node.modified_index, "Key changed");
                    self.after_index = Some(node.modified_index);
                    return Ok(node);
                }

                Ok(None) => continue,

                Err(Error::Etcd(error)) if error.error_code == EVENT_INDEX_CLEARED => {
                    let node = match self.client.get(&self.key, RESYNC_TIMEOUT).await {
                        Ok(node) => node,
                        // The key was deleted while the history was compacted.
                        Err(Error::Etcd(missing)) if missing.error_code == KEY_NOT_FOUND => Node {
                            key: self.key.clone(),
                            value: String::new(),
                            modified_index: missing.index,
                        },
                        Err(error) => return Err(error),
                    };
                    let last = self.after_index;
                    self.after_index = Some(node.modified_index.max(error.index));
                    debug!(
                        key = %self.key,
                        index = node.modified_index,
                        cleared = error.index,
                        "Watch history cleared; resynchronized"
                    );
                    if last.map_or(true, |last| node.modified_index > last) {
                        return Ok(node);
                    }
                }

                Err(error @ Error::Etcd(_)) => return Err(error),

                Err(error) => {
                    self.endpoint = (self.endpoint + 1) % self.client.endpoints.len();
                    return Err(error);
                }
            }
        }
    }
}
