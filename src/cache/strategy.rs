//! Cache-first and network-first fetch strategies.

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::{Bucket, CacheStore};
use super::types::{
  CacheResult, CachedResponse, RequestKey, ResourceRequest, ResourceResponse, ResponseType,
};
use crate::error::Result;
use crate::network::Fetcher;

/// Runs the two fetch disciplines against the current generation's bucket.
///
/// Holds no per-request state, so any number of dispatches may share one
/// engine. Concurrent writes to the same key race and the last one wins.
pub struct StrategyEngine<S: CacheStore + ?Sized, F: Fetcher + ?Sized> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
  /// Entries older than this are refreshed by cache-first. None = never.
  max_age: Option<Duration>,
}

impl<S: CacheStore + ?Sized, F: Fetcher + ?Sized> StrategyEngine<S, F> {
  pub fn new(store: Arc<S>, fetcher: Arc<F>, generation: impl Into<String>) -> Self {
    Self {
      store,
      fetcher,
      generation: generation.into(),
      max_age: None,
    }
  }

  /// Set a maximum age for cache-first hits.
  pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn fetcher(&self) -> &Arc<F> {
    &self.fetcher
  }

  /// Cache identity of a request.
  pub fn key_for(&self, request: &ResourceRequest) -> RequestKey {
    RequestKey::new(&request.method, self.fetcher.resolve(&request.locator))
  }

  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    self
      .max_age
      .is_some_and(|max_age| Utc::now() - cached_at > max_age)
  }

  /// Only same-origin 200 responses to GET requests are cached.
  pub fn is_eligible(request: &ResourceRequest, response: &ResourceResponse) -> bool {
    request.method == Method::GET
      && response.status == 200
      && response.response_type == ResponseType::Basic
  }

  /// Cached entry for a request. Non-GET requests never match.
  async fn lookup(
    &self,
    bucket: &Bucket,
    key: &RequestKey,
    request: &ResourceRequest,
  ) -> Result<Option<CachedResponse>> {
    if request.method != Method::GET {
      return Ok(None);
    }
    self.store.get(bucket, key).await
  }

  /// Fetch from the network and store a snapshot if the response is eligible.
  /// The live response is returned either way.
  pub async fn fetch_and_populate(
    &self,
    bucket: &Bucket,
    key: &RequestKey,
    request: &ResourceRequest,
  ) -> Result<ResourceResponse> {
    let response = self.fetcher.fetch(request).await?;

    if Self::is_eligible(request, &response) {
      self.store.put(bucket, key, &response).await?;
      debug!(key = %key, bucket = bucket.name(), "Stored response");
    } else {
      debug!(
        key = %key,
        status = response.status,
        response_type = response.response_type.as_str(),
        "Response not eligible for caching"
      );
    }

    Ok(response)
  }

  /// Serve from the current bucket; go to the network only on a miss.
  ///
  /// 1. Cached and fresh: return it without touching the network
  /// 2. Missing: fetch, cache if eligible, return the live response
  /// 3. Cached but older than `max_age`: refetch, and fall back to the old
  ///    entry if the network is unreachable
  pub async fn cache_first(
    &self,
    request: &ResourceRequest,
  ) -> Result<CacheResult<ResourceResponse>> {
    let bucket = self.store.open_bucket(&self.generation).await?;
    let key = self.key_for(request);

    match self.lookup(&bucket, &key, request).await? {
      Some(cached) if !self.is_stale(cached.cached_at) => {
        debug!(key = %key, "Cache hit");
        Ok(CacheResult::from_cache(cached.response, cached.cached_at))
      }
      Some(stale) => match self.fetch_and_populate(&bucket, &key, request).await {
        Ok(response) => Ok(CacheResult::from_network(response)),
        Err(e) if e.is_network() => {
          warn!(key = %key, error = %e, "Network failed, serving expired entry");
          Ok(CacheResult::offline(stale.response, stale.cached_at))
        }
        Err(e) => Err(e),
      },
      None => {
        debug!(key = %key, "Cache miss");
        let response = self.fetch_and_populate(&bucket, &key, request).await?;
        Ok(CacheResult::from_network(response))
      }
    }
  }

  /// Prefer the network; fall back to the current bucket when the fetch
  /// fails or returns something that may not be cached.
  ///
  /// A failed fetch with nothing cached propagates the network error. An
  /// ineligible response with nothing cached is returned unchanged.
  pub async fn network_first(
    &self,
    request: &ResourceRequest,
  ) -> Result<CacheResult<ResourceResponse>> {
    let bucket = self.store.open_bucket(&self.generation).await?;
    let key = self.key_for(request);

    match self.fetcher.fetch(request).await {
      Ok(response) if Self::is_eligible(request, &response) => {
        self.store.put(&bucket, &key, &response).await?;
        debug!(key = %key, bucket = bucket.name(), "Stored response");
        Ok(CacheResult::from_network(response))
      }
      Ok(response) => match self.lookup(&bucket, &key, request).await? {
        Some(cached) => {
          warn!(
            key = %key,
            status = response.status,
            "Ineligible network response, serving cached entry"
          );
          Ok(CacheResult::offline(cached.response, cached.cached_at))
        }
        None => Ok(CacheResult::from_network(response)),
      },
      Err(e) if e.is_network() => match self.lookup(&bucket, &key, request).await? {
        Some(cached) => {
          warn!(key = %key, error = %e, "Network failed, serving cached entry");
          Ok(CacheResult::offline(cached.response, cached.cached_at))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }
}

impl<S: CacheStore + ?Sized, F: Fetcher + ?Sized> Clone for StrategyEngine<S, F> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: Arc::clone(&self.fetcher),
      generation: self.generation.clone(),
      max_age: self.max_age,
    }
  }
}
