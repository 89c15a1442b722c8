//! The offline cache proxy component.
//!
//! Sits between outgoing requests and the network, applying a network-first
//! policy with cache fallback, and managing the versioned cache lifecycle:
//! provisioning the precache set on install, evicting stale generations on
//! activate, and intercepting fetches for the rest of the worker's life.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use reqwest::Method;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::cache::{request_key, CacheStore, StoredResponse};
use crate::config::Config;
use crate::net::{FetchRequest, FetchedResponse, Fetcher};

/// Worker lifecycle phase, advanced once per signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Initial state, provisioning not yet run
  Installing,
  /// Precache committed, eligible for activation without waiting
  Installed,
  /// Evicting stale generations
  Activating,
  /// Controlling requests
  Activated,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Stored copy served because the network was unreachable
  Cache,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::Cache => write!(f, "cache"),
    }
  }
}

/// Result of an intercepted fetch.
#[derive(Debug, Clone)]
pub struct InterceptOutcome {
  pub response: FetchedResponse,
  pub source: ResponseSource,
}

/// The offline cache proxy.
///
/// Owns the cache store exclusively; nothing else reads or writes it.
pub struct CacheProxy<S: CacheStore, F: Fetcher> {
  store: Arc<S>,
  fetcher: Arc<F>,
  phase: Arc<RwLock<Phase>>,
  cache_name: String,
  origin: Url,
  precache: Vec<String>,
  bypass_hosts: Vec<String>,
}

impl<S: CacheStore, F: Fetcher> CacheProxy<S, F> {
  pub fn new(config: &Config, store: S, fetcher: F) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", config.origin, e))?;

    Ok(Self {
      store: Arc::new(store),
      fetcher: Arc::new(fetcher),
      phase: Arc::new(RwLock::new(Phase::Installing)),
      cache_name: config.cache_name.clone(),
      origin,
      precache: config.precache.clone(),
      bypass_hosts: config.bypass_hosts.clone(),
    })
  }

  /// Current lifecycle phase.
  pub fn phase(&self) -> Phase {
    *self.phase.read().unwrap_or_else(|e| e.into_inner())
  }

  fn set_phase(&self, phase: Phase) {
    *self.phase.write().unwrap_or_else(|e| e.into_inner()) = phase;
    info!("Worker phase: {:?}", phase);
  }

  /// Provision the precache set under the current generation (install).
  ///
  /// Every resource is fetched before anything is committed; if any single
  /// fetch fails or resolves with a non-success status, provisioning fails
  /// as a whole and the store is untouched. On success the worker is
  /// immediately eligible for activation rather than waiting out a
  /// predecessor.
  pub async fn provision(&self) -> Result<()> {
    info!(
      "Provisioning {} resources into generation {}",
      self.precache.len(),
      self.cache_name
    );

    let requests: Vec<FetchRequest> = self
      .precache
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(FetchRequest::get)
          .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))
      })
      .collect::<Result<_>>()?;

    let entries = try_join_all(requests.iter().map(|request| self.fetch_entry(request))).await?;

    self.store.put_all(&self.cache_name, &entries)?;
    self.set_phase(Phase::Installed);

    Ok(())
  }

  async fn fetch_entry(&self, request: &FetchRequest) -> Result<(String, StoredResponse)> {
    let response = self.fetcher.fetch(request).await?;

    // A reachable server answering 404 must still fail the precache
    if !(200..300).contains(&response.status) {
      return Err(eyre!(
        "Precache fetch for {} returned status {}",
        request.url,
        response.status
      ));
    }

    Ok((request_key(request), to_stored(request, &response)))
  }

  /// Delete every store whose name is not the current generation (activate).
  ///
  /// Completion signals readiness to take over already-open traffic.
  pub async fn activate_and_evict(&self) -> Result<()> {
    self.set_phase(Phase::Activating);

    for name in self.store.store_names()? {
      if name != self.cache_name {
        info!("Evicting stale cache generation {}", name);
        self.store.delete_store(&name)?;
      }
    }

    self.set_phase(Phase::Activated);

    Ok(())
  }

  /// Handle an intercepted request (fetch).
  ///
  /// Non-GET requests and denylisted URLs pass straight through. Everything
  /// else is network-first: any resolved response, error status included, is
  /// returned live with a copy persisted best-effort; only a transport
  /// failure falls back to the stored copy, and a store miss propagates the
  /// original failure.
  pub async fn intercept(&self, request: &FetchRequest) -> Result<InterceptOutcome> {
    if self.bypasses_cache(request) {
      let response = self.fetcher.fetch(request).await?;
      return Ok(InterceptOutcome {
        response,
        source: ResponseSource::Network,
      });
    }

    let key = request_key(request);

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        // The body was buffered once off the wire; this copy goes to the
        // store and the live response goes back to the caller.
        if let Err(e) = self.store.put(&self.cache_name, &key, &to_stored(request, &response)) {
          warn!("Failed to cache {}: {}", request.url, e);
        }

        Ok(InterceptOutcome {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(fetch_err) => match self.store.get(&self.cache_name, &key) {
        Ok(Some(entry)) => {
          info!(
            "Network unreachable for {}, serving copy cached at {}",
            request.url, entry.cached_at
          );

          Ok(InterceptOutcome {
            response: FetchedResponse {
              status: entry.response.status,
              headers: entry.response.headers,
              body: entry.response.body,
            },
            source: ResponseSource::Cache,
          })
        }
        Ok(None) => Err(fetch_err),
        Err(store_err) => {
          warn!("Cache lookup for {} failed: {}", request.url, store_err);
          Err(fetch_err)
        }
      },
    }
  }

  /// Whether the cache policy does not apply to this request at all.
  fn bypasses_cache(&self, request: &FetchRequest) -> bool {
    if request.method != Method::GET {
      return true;
    }

    let url = request.url.as_str();
    self.bypass_hosts.iter().any(|host| url.contains(host.as_str()))
  }
}

fn to_stored(request: &FetchRequest, response: &FetchedResponse) -> StoredResponse {
  StoredResponse {
    url: request.url.to_string(),
    status: response.status,
    headers: response.headers.clone(),
    body: response.body.clone(),
  }
}

impl<S: CacheStore, F: Fetcher> Clone for CacheProxy<S, F> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: Arc::clone(&self.fetcher),
      phase: Arc::clone(&self.phase),
      cache_name: self.cache_name.clone(),
      origin: self.origin.clone(),
      precache: self.precache.clone(),
      bypass_hosts: self.bypass_hosts.clone(),
    }
  }
}
