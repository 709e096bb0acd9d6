//! Lifecycle phases: install (seed), fetch (dispatch) and activate (prune).
//!
//! Each phase is triggered independently by the host and is idempotent given
//! the same bucket contents. Ordering between phases is the host's business.

use chrono::Duration;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use super::classify::{classify, RequestClass};
use super::storage::CacheStore;
use super::strategy::StrategyEngine;
use super::types::{CacheResult, RequestKey, ResourceRequest, ResourceResponse};
use crate::error::{CacheError, Result};
use crate::network::Fetcher;

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct SeedReport {
  pub bucket: String,
  /// Keys stored, in seed list order
  pub stored: Vec<RequestKey>,
}

/// Drives the three lifecycle phases against an injected store and fetcher.
pub struct LifecycleController<S: CacheStore + ?Sized, F: Fetcher + ?Sized> {
  engine: StrategyEngine<S, F>,
  seed: Arc<[String]>,
}

impl<S: CacheStore + ?Sized, F: Fetcher + ?Sized> LifecycleController<S, F> {
  pub fn new(
    store: Arc<S>,
    fetcher: Arc<F>,
    generation: impl Into<String>,
    seed: Vec<String>,
  ) -> Self {
    Self {
      engine: StrategyEngine::new(store, fetcher, generation),
      seed: seed.into(),
    }
  }

  /// Enable expiry of cache-first entries.
  pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
    self.engine = self.engine.with_max_age(max_age);
    self
  }

  pub fn generation(&self) -> &str {
    self.engine.generation()
  }

  pub fn store(&self) -> &Arc<S> {
    self.engine.store()
  }

  /// Seed the current bucket with every locator in the seed list.
  ///
  /// Any fetch failure or non-2xx status fails the whole phase. Entries
  /// stored before the failure stay in place; the host is expected to retry.
  pub async fn install(&self) -> Result<SeedReport> {
    let generation = self.engine.generation();
    info!(generation, resources = self.seed.len(), "Seeding cache");

    let store = self.engine.store();
    let bucket = store.open_bucket(generation).await?;
    let mut stored = Vec::with_capacity(self.seed.len());

    for locator in self.seed.iter() {
      let request = ResourceRequest::get(locator.as_str());
      let response = self
        .engine
        .fetcher()
        .fetch(&request)
        .await
        .map_err(|e| match e {
          CacheError::Network { reason, .. } => CacheError::Seed {
            locator: locator.clone(),
            reason,
          },
          other => other,
        })?;

      if !response.is_ok() {
        return Err(CacheError::Seed {
          locator: locator.clone(),
          reason: format!("HTTP {} {}", response.status, response.status_text)
            .trim_end()
            .to_string(),
        });
      }

      let key = self.engine.key_for(&request);
      store.put(&bucket, &key, &response).await?;
      debug!(key = %key, "Seeded");
      stored.push(key);
    }

    info!(generation, stored = stored.len(), "Cache seeded");
    Ok(SeedReport {
      bucket: bucket.name().to_string(),
      stored,
    })
  }

  /// Answer one intercepted request: network-first for dynamic requests,
  /// cache-first for everything else. The class is decided on the absolute
  /// URL, so an origin host like `api.example.com` makes every request dynamic.
  pub async fn dispatch(
    &self,
    request: &ResourceRequest,
  ) -> Result<CacheResult<ResourceResponse>> {
    let url = self.engine.fetcher().resolve(&request.locator);
    let class = classify(&url);
    debug!(url = %url, method = %request.method, ?class, "Dispatching");

    match class {
      RequestClass::Dynamic => self.engine.network_first(request).await,
      RequestClass::Static => self.engine.cache_first(request).await,
    }
  }

  /// Delete every bucket not named after the current generation.
  /// Returns the names of the deleted buckets.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let generation = self.engine.generation();
    let store = self.engine.store();

    let stale: Vec<String> = store
      .bucket_names()
      .await?
      .into_iter()
      .filter(|name| name != generation)
      .collect();

    let deletions = stale.iter().map(|name| async move {
      store.delete_bucket(name).await?;
      Ok::<_, CacheError>(name.clone())
    });
    let pruned = try_join_all(deletions).await?;

    info!(generation, pruned = ?pruned, "Stale buckets pruned");
    Ok(pruned)
  }
}

impl<S: CacheStore + ?Sized, F: Fetcher + ?Sized> Clone for LifecycleController<S, F> {
  fn clone(&self) -> Self {
    Self {
      engine: self.engine.clone(),
      seed: Arc::clone(&self.seed),
    }
  }
}
