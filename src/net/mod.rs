//! Network client for outgoing fetches.

mod client;

pub use client::{FetchRequest, FetchedResponse, Fetcher, HttpFetcher};
