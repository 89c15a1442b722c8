mod cache;
mod config;
mod event;
mod net;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "An offline-first caching fetch proxy")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache generation identifier to use instead of the configured one
  #[arg(short, long)]
  generation: Option<String>,

  /// URLs to fetch through the proxy after install and activation
  urls: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override the generation if specified on the command line
  let config = if let Some(generation) = args.generation {
    config::Config {
      cache_name: generation,
      ..config
    }
  } else {
    config
  };

  let store = cache::SqliteStore::open()?;
  let fetcher = net::HttpFetcher::new()?;
  let proxy = worker::CacheProxy::new(&config, store, fetcher)?;
  let host = event::Host::spawn(proxy);

  // A failed install leaves the old generation live; the next run retries.
  host.install().await?;
  host.activate().await?;

  for raw in &args.urls {
    let url = url::Url::parse(raw)?;
    let outcome = host.fetch(net::FetchRequest::get(url)).await?;
    println!("{} {} ({})", outcome.response.status, raw, outcome.source);
  }

  Ok(())
}
