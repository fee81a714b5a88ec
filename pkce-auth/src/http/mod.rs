//! HTTP client building for token endpoint requests.

mod client;

pub use client::{HttpClientBuilder, HttpClientConfig};
