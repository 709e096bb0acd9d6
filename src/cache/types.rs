//! Request, response and snapshot types shared by the store and the strategies.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::fmt;

/// Header list in wire order. Names are kept as received.
pub type Headers = Vec<(String, String)>;

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
  pub method: Method,
  /// Target locator, either origin-relative ("/index.html") or absolute.
  pub locator: String,
  pub headers: Headers,
}

impl ResourceRequest {
  pub fn get(locator: impl Into<String>) -> Self {
    Self {
      method: Method::GET,
      locator: locator.into(),
      headers: Vec::new(),
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// How the response relates to the origin it was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response; the only kind that may be cached.
  Basic,
  /// A same-origin request that ended up on another origin.
  Cors,
  /// A request aimed at another origin altogether.
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// A fully buffered response.
///
/// The body is read to completion when the response arrives, so a snapshot
/// can be stored and the live response still returned to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  /// Final URL after redirects.
  pub url: String,
  pub response_type: ResponseType,
}

impl ResourceResponse {
  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup, first match wins.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Identity of an entry within a bucket: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: impl Into<String>) -> Self {
    Self {
      method: method.as_str().to_string(),
      url: url.into(),
    }
  }

  /// SHA256 of "METHOD url", hex encoded. Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A stored snapshot. Entries carry no expiry of their own; whole buckets are
/// replaced per generation, and an optional max age is judged from `cached_at`.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: ResourceResponse,
  /// When the snapshot was stored
  pub cached_at: DateTime<Utc>,
}

/// Result of a dispatch, including the data and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Live data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// A cached entry used on the strategy's primary path.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// A cached entry served because the network path failed.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Cache hit
  Cache,
  /// Network failed or was ineligible, serving cached data
  Offline,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
    };
    f.pad(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_hash_depends_on_method() {
    let get = RequestKey::new(&Method::GET, "https://shop.test/api/cart");
    let head = RequestKey::new(&Method::HEAD, "https://shop.test/api/cart");
    assert_ne!(get.cache_hash(), head.cache_hash());
    assert_eq!(get.cache_hash().len(), 64);
    assert_eq!(get.cache_hash(), get.clone().cache_hash());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = ResourceResponse {
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: Vec::new(),
      url: "https://shop.test/".to_string(),
      response_type: ResponseType::Basic,
    };
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_response_type_parse() {
    for t in [ResponseType::Basic, ResponseType::Cors, ResponseType::Opaque] {
      assert_eq!(ResponseType::parse(t.as_str()), Some(t));
    }
    assert_eq!(ResponseType::parse("error"), None);
  }
}
