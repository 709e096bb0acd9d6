//! Origin client used by the caching strategies.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use url::Url;

use crate::cache::{ResourceRequest, ResourceResponse, ResponseType};
use crate::error::CacheError;

/// Something that can perform a network fetch for an intercepted request.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Absolute URL a locator refers to. Used as the cache identity.
  fn resolve(&self, locator: &str) -> String;

  /// Perform the fetch. Transport failures are `CacheError::Network`; any
  /// HTTP status, including 4xx/5xx, is a successful fetch.
  async fn fetch(&self, request: &ResourceRequest) -> crate::error::Result<ResourceResponse>;
}

/// HTTP fetcher bound to a single origin.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: &str) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
    if origin.cannot_be_a_base() {
      return Err(eyre!("Origin '{}' cannot be used as a base URL", origin));
    }

    let client = Client::builder()
      .user_agent(concat!("offline-cache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  /// Basic when both the requested and the final URL share our origin,
  /// cors when a redirect left it, opaque when the request never targeted it.
  fn response_type(&self, requested: &Url, final_url: &Url) -> ResponseType {
    if requested.origin() != self.origin.origin() {
      ResponseType::Opaque
    } else if final_url.origin() != self.origin.origin() {
      ResponseType::Cors
    } else {
      ResponseType::Basic
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  fn resolve(&self, locator: &str) -> String {
    self
      .origin
      .join(locator)
      .map(String::from)
      .unwrap_or_else(|_| locator.to_string())
  }

  async fn fetch(&self, request: &ResourceRequest) -> crate::error::Result<ResourceResponse> {
    let url = self
      .origin
      .join(&request.locator)
      .map_err(|e| CacheError::network(&request.locator, e))?;

    let mut builder = self.client.request(request.method.clone(), url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| CacheError::network(url.as_str(), e))?;

    let status = response.status();
    let final_url = response.url().clone();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    // Buffer the whole body now so a snapshot can be taken later.
    let body = response
      .bytes()
      .await
      .map_err(|e| CacheError::network(url.as_str(), e))?
      .to_vec();

    Ok(ResourceResponse {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
      response_type: self.response_type(&url, &final_url),
      url: final_url.into(),
    })
  }
}
