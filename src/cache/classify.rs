//! Request classification.

/// Which caching discipline a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Mutable API call, served network-first
  Dynamic,
  /// Page or static asset, served cache-first
  Static,
}

/// Classify a locator by substring: anything containing `/api/` or `api.`
/// (an API subdomain) is dynamic, everything else is static.
///
/// This is a coarse heuristic. A static path such as `/img/okapi.png` is
/// classified dynamic and simply loses cache-first treatment.
pub fn classify(locator: &str) -> RequestClass {
  if locator.contains("/api/") || locator.contains("api.") {
    RequestClass::Dynamic
  } else {
    RequestClass::Static
  }
}
