//! Request identity hashing.

use sha2::{Digest, Sha256};

use crate::net::FetchRequest;

/// Stable cache key for a request identity (method + URL).
///
/// SHA256 hash for stable, fixed-length keys.
pub fn request_key(request: &FetchRequest) -> String {
  let input = format!("{} {}", request.method, request.url);

  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  let result = hasher.finalize();
  hex::encode(result)
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn request(method: Method, url: &str) -> FetchRequest {
    FetchRequest {
      method,
      url: Url::parse(url).unwrap(),
    }
  }

  #[test]
  fn same_identity_same_key() {
    let a = request(Method::GET, "https://example.com/index.html");
    let b = request(Method::GET, "https://example.com/index.html");
    assert_eq!(request_key(&a), request_key(&b));
  }

  #[test]
  fn method_distinguishes_identity() {
    let get = request(Method::GET, "https://example.com/");
    let head = request(Method::HEAD, "https://example.com/");
    assert_ne!(request_key(&get), request_key(&head));
  }

  #[test]
  fn url_distinguishes_identity() {
    let a = request(Method::GET, "https://example.com/styles.css");
    let b = request(Method::GET, "https://example.com/manifest.json");
    assert_ne!(request_key(&a), request_key(&b));
  }
}
