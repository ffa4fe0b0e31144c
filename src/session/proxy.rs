//! Lazy, cached, self-healing handles to externally hosted objects.
//!
//! A [`ResourceProxy`] wraps one hosted object - a thread, a message - that
//! may be absent, slow, or permanently gone. Fetching is memoized; every
//! failure is routed through a pluggable [`ErrorPolicy`], so "silent during
//! teardown" is a policy swap instead of conditionals at the call sites.

use crate::chat::ChatError;
use futures_util::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};

/// What a policy decided about one platform error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerdict {
    /// Abandon the operation for this cycle; the next trigger retries.
    Transient,
    /// The resource is permanently gone; the owner must tear down.
    Fatal,
}

/// Pluggable error classification strategy.
pub trait ErrorPolicy: Send + Sync {
    fn assess(&self, error: &ChatError) -> ErrorVerdict;
}

/// Absorbs everything without a word. Installed on every proxy while its
/// owner tears down, so a dying session cannot produce an error storm.
pub struct SilentPolicy;

impl ErrorPolicy for SilentPolicy {
    fn assess(&self, _error: &ChatError) -> ErrorVerdict {
        ErrorVerdict::Transient
    }
}

/// One-shot teardown latch shared between an owner and its proxies' policy.
pub struct FatalSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl FatalSignal {
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Completes once the signal has fired, immediately if it already has.
    pub async fn notified(&self) {
        if self.fired() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for FatalSignal {
    fn default() -> Self {
        Self::new()
    }
}

type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, ChatError>> + Send + Sync>;

/// Cached-optional-with-fetcher handle to one hosted object.
pub struct ResourceProxy<T> {
    /// Holding this across the fetch serializes concurrent fetchers.
    cell: Mutex<Option<T>>,
    fetcher: SyncMutex<Option<Fetcher<T>>>,
    policy: SyncMutex<Arc<dyn ErrorPolicy>>,
}

impl<T: Clone + Send + 'static> ResourceProxy<T> {
    pub fn new(policy: Arc<dyn ErrorPolicy>) -> Self {
        Self {
            cell: Mutex::new(None),
            fetcher: SyncMutex::new(None),
            policy: SyncMutex::new(policy),
        }
    }

    pub fn with_fetcher<F>(policy: Arc<dyn ErrorPolicy>, fetcher: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<T, ChatError>> + Send + Sync + 'static,
    {
        let proxy = Self::new(policy);
        proxy.set_fetcher(fetcher);
        proxy
    }

    pub fn set_fetcher<F>(&self, fetcher: F)
    where
        F: Fn() -> BoxFuture<'static, Result<T, ChatError>> + Send + Sync + 'static,
    {
        *self.fetcher.lock() = Some(Box::new(fetcher));
    }

    pub fn set_policy(&self, policy: Arc<dyn ErrorPolicy>) {
        *self.policy.lock() = policy;
    }

    fn absorb(&self, error: ChatError) {
        let policy = Arc::clone(&self.policy.lock());
        let _ = policy.assess(&error);
    }

    /// The cached value, fetching it first if needed. Absent on failure or
    /// when no fetcher is installed yet; fetching again later is the only
    /// retry mechanism.
    pub async fn fetch(&self) -> Option<T> {
        let mut cell = self.cell.lock().await;
        if let Some(value) = cell.as_ref() {
            return Some(value.clone());
        }
        let pending = { self.fetcher.lock().as_ref().map(|f| f()) };
        let pending = pending?;
        match pending.await {
            Ok(value) => {
                *cell = Some(value.clone());
                Some(value)
            }
            Err(error) => {
                drop(cell);
                self.absorb(error);
                None
            }
        }
    }

    /// The cached value without fetching.
    pub async fn peek(&self) -> Option<T> {
        self.cell.lock().await.clone()
    }

    pub async fn assign(&self, value: T) {
        *self.cell.lock().await = Some(value);
    }

    pub async fn invalidate(&self) {
        *self.cell.lock().await = None;
    }

    /// Run `op` against the resolved value, absorbing its errors through the
    /// policy. Absent when the value could not be resolved or `op` failed.
    pub async fn wait<R, Fut>(&self, op: impl FnOnce(T) -> Fut) -> Option<R>
    where
        Fut: Future<Output = Result<R, ChatError>>,
    {
        let value = self.fetch().await?;
        match op(value).await {
            Ok(result) => Some(result),
            Err(error) => {
                self.absorb(error);
                None
            }
        }
    }

    /// Map the resolved value synchronously.
    pub async fn map<R>(&self, f: impl FnOnce(T) -> R) -> Option<R> {
        Some(f(self.fetch().await?))
    }
}
