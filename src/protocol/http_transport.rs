use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};
use crate::protocol::transport::{Transport, TransportError, TransportEvent, TransportResponse, TransportToken};

/// This is an abstraction for performing a single HTTP GET, introduced to facilitate mocking the
///  network away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

pub struct HyperFetcher {
    client: Client<HttpConnector, Empty<Bytes>>,
}
impl HyperFetcher {
    pub fn new() -> HyperFetcher {
        HyperFetcher {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HyperFetcher {
    fn default() -> Self {
        HyperFetcher::new()
    }
}

#[async_trait]
impl HttpFetcher for HyperFetcher {
    async fn fetch(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let uri: Uri = url.parse()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;

        let response = self.client.get(uri).await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(TransportError::UnexpectedStatus(status));
        }

        let headers = response.headers().iter()
            .filter_map(|(name, value)| value.to_str().ok()
                .map(|value| (name.as_str().to_string(), value.to_string())))
            .collect();

        let body = response.into_body().collect().await
            .map_err(|e| TransportError::Http(e.to_string()))?
            .to_bytes();
        if body.is_empty() {
            return Err(TransportError::MissingBody);
        }

        trace!("GET {}: received {} bytes", url, body.len());
        Ok(TransportResponse { status, headers, body })
    }
}

/// Sends every request in a spawned tokio task, reporting completions on an mpsc channel. This
///  must be used from inside a tokio runtime.
pub struct HttpTransport {
    fetcher: Arc<dyn HttpFetcher>,
    events: mpsc::UnboundedSender<TransportEvent>,
}
impl HttpTransport {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, events: mpsc::UnboundedSender<TransportEvent>) -> HttpTransport {
        HttpTransport { fetcher, events }
    }
}

impl Transport for HttpTransport {
    fn send(&self, token: TransportToken, url: &str) {
        trace!("GET {} for {:?}", url, token);

        let fetcher = self.fetcher.clone();
        let events = self.events.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let result = fetcher.fetch(&url).await;
            if let Err(e) = &result {
                error!("GET {} failed: {}", url, e);
            }

            if events.send(TransportEvent { token, result }).is_err() {
                debug!("session is gone - discarding response for {:?}", token);
            }
        });
    }
}
