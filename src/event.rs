//! Host-side lifecycle dispatch.
//!
//! Models the hosting runtime's extension contract as message passing: the
//! host emits typed lifecycle events, the worker handles each one, and the
//! oneshot channel on every event is the completion token the host awaits
//! before considering the phase done.

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};

use crate::cache::CacheStore;
use crate::net::{FetchRequest, Fetcher};
use crate::worker::{CacheProxy, InterceptOutcome};

/// Lifecycle signals dispatched by the host.
pub enum Lifecycle {
  /// Provision the precache set
  Install { done: oneshot::Sender<Result<()>> },
  /// Evict stale generations and claim open traffic
  Activate { done: oneshot::Sender<Result<()>> },
  /// An outgoing request to intercept
  Fetch {
    request: FetchRequest,
    respond: oneshot::Sender<Result<InterceptOutcome>>,
  },
}

/// Host dispatcher driving a single worker instance.
///
/// Install and activate are handled inline and awaited to completion before
/// the next event; each fetch runs as an independent task, so any number of
/// intercepts may be in flight at once.
pub struct Host {
  tx: mpsc::UnboundedSender<Lifecycle>,
}

impl Host {
  /// Spawn the dispatch loop for the given worker.
  pub fn spawn<S, F>(proxy: CacheProxy<S, F>) -> Self
  where
    S: CacheStore + 'static,
    F: Fetcher + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        match event {
          Lifecycle::Install { done } => {
            let _ = done.send(proxy.provision().await);
          }
          Lifecycle::Activate { done } => {
            let _ = done.send(proxy.activate_and_evict().await);
          }
          Lifecycle::Fetch { request, respond } => {
            let proxy = proxy.clone();
            tokio::spawn(async move {
              let _ = respond.send(proxy.intercept(&request).await);
            });
          }
        }
      }
    });

    Self { tx }
  }

  /// Dispatch the install signal and await its completion.
  pub async fn install(&self) -> Result<()> {
    let (done, completion) = oneshot::channel();
    self
      .tx
      .send(Lifecycle::Install { done })
      .map_err(|_| eyre!("Worker is gone"))?;

    completion
      .await
      .map_err(|_| eyre!("Worker dropped the install signal"))?
  }

  /// Dispatch the activate signal and await its completion.
  pub async fn activate(&self) -> Result<()> {
    let (done, completion) = oneshot::channel();
    self
      .tx
      .send(Lifecycle::Activate { done })
      .map_err(|_| eyre!("Worker is gone"))?;

    completion
      .await
      .map_err(|_| eyre!("Worker dropped the activate signal"))?
  }

  /// Dispatch a fetch event and await the intercepted response.
  pub async fn fetch(&self, request: FetchRequest) -> Result<InterceptOutcome> {
    let (respond, completion) = oneshot::channel();
    self
      .tx
      .send(Lifecycle::Fetch { request, respond })
      .map_err(|_| eyre!("Worker is gone"))?;

    completion
      .await
      .map_err(|_| eyre!("Worker dropped the fetch event"))?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::config::Config;
  use crate::net::FetchedResponse;
  use crate::worker::{Phase, ResponseSource};
  use async_trait::async_trait;
  use url::Url;

  /// Fetcher serving a fixed body for every app-origin URL.
  struct FixedFetcher;

  #[async_trait]
  impl Fetcher for FixedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse> {
      Ok(FetchedResponse {
        status: 200,
        headers: Vec::new(),
        body: request.url.path().as_bytes().to_vec(),
      })
    }
  }

  fn config() -> Config {
    Config {
      origin: "https://app.example.com".to_string(),
      cache_name: "app-shell-v1".to_string(),
      precache: vec!["/".to_string(), "/index.html".to_string()],
      bypass_hosts: vec!["firebaseio.com".to_string()],
    }
  }

  #[tokio::test]
  async fn full_lifecycle_install_activate_fetch() {
    let proxy = CacheProxy::new(
      &config(),
      SqliteStore::open_in_memory().unwrap(),
      FixedFetcher,
    )
    .unwrap();
    let handle = proxy.clone();
    let host = Host::spawn(proxy);

    host.install().await.unwrap();
    assert_eq!(handle.phase(), Phase::Installed);

    host.activate().await.unwrap();
    assert_eq!(handle.phase(), Phase::Activated);

    let outcome = host
      .fetch(FetchRequest::get(
        Url::parse("https://app.example.com/styles.css").unwrap(),
      ))
      .await
      .unwrap();

    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(outcome.response.body, b"/styles.css");
  }

  #[tokio::test]
  async fn concurrent_fetches_all_complete() {
    let proxy = CacheProxy::new(
      &config(),
      SqliteStore::open_in_memory().unwrap(),
      FixedFetcher,
    )
    .unwrap();
    let host = Host::spawn(proxy);

    host.install().await.unwrap();
    host.activate().await.unwrap();

    let fetches = (0..8).map(|i| {
      let url = Url::parse(&format!("https://app.example.com/page-{}.html", i)).unwrap();
      host.fetch(FetchRequest::get(url))
    });

    let outcomes = futures::future::try_join_all(fetches).await.unwrap();
    assert_eq!(outcomes.len(), 8);
    for (i, outcome) in outcomes.iter().enumerate() {
      assert_eq!(outcome.response.body, format!("/page-{}.html", i).as_bytes());
    }
  }
}
