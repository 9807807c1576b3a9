//! Fetcher contract for metric retrieval
//!
//! A fetcher is a caller-supplied, zero-argument asynchronous operation that
//! retrieves one metric's data or fails. The engine assumes nothing beyond a
//! single eventual outcome: any timeout, caching, or authentication policy
//! belongs to the fetcher itself.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use serde_json::Value;

/// A single-metric retrieval operation
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the metric's current value
    async fn fetch(&self) -> Result<Value>;
}

/// Adapter wrapping an async closure as a [`Fetcher`]
struct FetchFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Fetcher for FetchFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn fetch(&self) -> Result<Value> {
        (self.f)().await
    }
}

/// Wrap an async closure as a shareable fetcher
///
/// ```
/// use dashsync::fetch::fetch_fn;
/// use serde_json::json;
///
/// let fetcher = fetch_fn(|| async { Ok(json!({ "cpu": 0.42 })) });
/// ```
pub fn fetch_fn<F, Fut>(f: F) -> Arc<dyn Fetcher>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FetchFn { f })
}
