//! Test doubles shared by the cache unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::cache::{
  Bucket, CacheStore, CachedResponse, MemoryStore, RequestKey, ResourceRequest, ResourceResponse,
  ResponseType,
};
use crate::error::{CacheError, Result};
use crate::network::Fetcher;

pub const ORIGIN: &str = "https://shop.test";

#[derive(Clone)]
enum Reply {
  Respond(ResourceResponse),
  Fail,
}

/// Scripted fetcher that records every call.
/// Locators without a scripted reply fail like an unreachable network.
pub struct FakeFetcher {
  origin: String,
  replies: Mutex<HashMap<String, Reply>>,
  calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::with_origin(ORIGIN)
  }

  /// Resolve relative locators against `origin` instead of [`ORIGIN`].
  pub fn with_origin(origin: &str) -> Self {
    Self {
      origin: origin.to_string(),
      replies: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn respond(&self, locator: &str, response: ResourceResponse) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(locator.to_string(), Reply::Respond(response));
  }

  pub fn fail(&self, locator: &str) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(locator.to_string(), Reply::Fail);
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_for(&self, locator: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|l| l.as_str() == locator)
      .count()
  }
}

impl Default for FakeFetcher {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  fn resolve(&self, locator: &str) -> String {
    if locator.starts_with('/') {
      format!("{}{}", self.origin, locator)
    } else {
      locator.to_string()
    }
  }

  async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
    self.calls.lock().unwrap().push(request.locator.clone());
    let reply = self.replies.lock().unwrap().get(&request.locator).cloned();
    match reply {
      Some(Reply::Respond(response)) => Ok(response),
      Some(Reply::Fail) | None => Err(CacheError::network(
        &request.locator,
        "connection refused",
      )),
    }
  }
}

/// Store whose writes always fail, as on a full disk. Reads and bucket
/// listing go to an in-memory store.
#[derive(Default)]
pub struct FailingStore {
  inner: MemoryStore,
}

impl FailingStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CacheStore for FailingStore {
  async fn open_bucket(&self, name: &str) -> Result<Bucket> {
    self.inner.open_bucket(name).await
  }

  async fn get(&self, bucket: &Bucket, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.inner.get(bucket, key).await
  }

  async fn put(
    &self,
    _bucket: &Bucket,
    key: &RequestKey,
    _response: &ResourceResponse,
  ) -> Result<()> {
    Err(CacheError::storage(
      &format!("Failed to store {}", key),
      "disk full",
    ))
  }

  async fn delete_bucket(&self, name: &str) -> Result<bool> {
    Err(CacheError::storage(
      &format!("Failed to delete bucket {}", name),
      "disk full",
    ))
  }

  async fn bucket_names(&self) -> Result<Vec<String>> {
    self.inner.bucket_names().await
  }

  async fn keys(&self, bucket: &Bucket) -> Result<Vec<RequestKey>> {
    self.inner.keys(bucket).await
  }
}

/// A same-origin response with the given status and body.
pub fn response(status: u16, body: &str) -> ResourceResponse {
  ResourceResponse {
    status,
    status_text: String::new(),
    headers: vec![("content-type".to_string(), "text/plain".to_string())],
    body: body.as_bytes().to_vec(),
    url: ORIGIN.to_string(),
    response_type: ResponseType::Basic,
  }
}

/// A 200 response with the given type.
pub fn typed(response_type: ResponseType, body: &str) -> ResourceResponse {
  ResourceResponse {
    response_type,
    ..response(200, body)
  }
}
