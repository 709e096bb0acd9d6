//! Error taxonomy for the cache engine.
//!
//! Ineligible responses (non-200, cross-origin, non-GET) are not errors: the
//! strategies handle them as a policy branch.

use thiserror::Error;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CacheError {
  /// Bucket open/get/put/delete/list failed. Never retried.
  #[error("storage fault: {0}")]
  Storage(String),

  /// The origin could not be reached or the transfer broke off.
  #[error("network fault fetching {locator}: {reason}")]
  Network { locator: String, reason: String },

  /// One seed resource could not be fetched; the install phase failed as a whole.
  #[error("seeding failed at {locator}: {reason}")]
  Seed { locator: String, reason: String },
}

impl CacheError {
  pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
    Self::Storage(format!("{}: {}", context, err))
  }

  pub fn network(locator: impl Into<String>, err: impl std::fmt::Display) -> Self {
    Self::Network {
      locator: locator.into(),
      reason: err.to_string(),
    }
  }

  /// Whether this failure came from the network rather than storage.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. })
  }
}
