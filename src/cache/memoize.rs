//! Memoization on top of the store
//!
//! A `Memoizer` answers "have I computed this before?" by fingerprinting the
//! call and scanning the store. Hits are decoded and returned without running
//! the computation; misses run it once and persist the result.
//!
//! Only two kinds of failure reach the caller: the computation's own error,
//! which is never cached, and a store that cannot be read or written at all.
//! Malformed filenames, corrupt payloads and files vanishing mid-lookup are
//! all handled as misses.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::error::{CacheError, MemoError, ReadError};
use super::key::{derive_key, CallArgs, Fingerprint};
use super::store::Store;

/// A value together with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<T> {
    pub value: T,
    /// Whether the value was read from disk instead of computed
    pub from_cache: bool,
}

/// Entry point for memoizing calls against one cache directory
#[derive(Debug, Clone)]
pub struct Memoizer {
    store: Arc<Store>,
}

impl Memoizer {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Opens (and tidies) the cache directory described by `config`
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        Ok(Self::new(Store::open(config)?))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Wraps `f` so every call goes through the cache
    ///
    /// `identity` must be unique per distinct computation: two functions
    /// registered under the same identity share entries.
    pub fn wrap<F, T, E>(&self, identity: impl Into<String>, f: F) -> Memoized<F>
    where
        F: Fn(&CallArgs) -> Result<T, E>,
    {
        Memoized {
            memoizer: self.clone(),
            identity: identity.into(),
            f,
        }
    }

    /// Returns the cached result for `identity(args)` or computes and stores it
    pub fn get_or_compute<T, E, F>(
        &self,
        identity: &str,
        args: &CallArgs,
        compute: F,
    ) -> Result<T, MemoError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        self.resolve(identity, args, compute).map(|cached| cached.value)
    }

    /// Like [`Memoizer::get_or_compute`], also reporting whether it was a hit
    pub fn resolve<T, E, F>(
        &self,
        identity: &str,
        args: &CallArgs,
        compute: F,
    ) -> Result<CachedValue<T>, MemoError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        let fingerprint = derive_key(identity, args);
        if let Some(value) = self.lookup(&fingerprint)? {
            debug!(identity, %fingerprint, "Cache hit");
            return Ok(CachedValue {
                value,
                from_cache: true,
            });
        }

        debug!(identity, %fingerprint, "Cache miss");
        let value = compute().map_err(MemoError::Call)?;
        self.persist(&fingerprint, &value)?;
        Ok(CachedValue {
            value,
            from_cache: false,
        })
    }

    /// Async form of [`Memoizer::get_or_compute`]
    ///
    /// The future is only created and awaited on a miss. Cache I/O itself is
    /// small and stays blocking.
    pub async fn get_or_compute_async<T, E, F, Fut>(
        &self,
        identity: &str,
        args: &CallArgs,
        compute: F,
    ) -> Result<T, MemoError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.resolve_async(identity, args, compute)
            .await
            .map(|cached| cached.value)
    }

    /// Async form of [`Memoizer::resolve`]
    pub async fn resolve_async<T, E, F, Fut>(
        &self,
        identity: &str,
        args: &CallArgs,
        compute: F,
    ) -> Result<CachedValue<T>, MemoError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let fingerprint = derive_key(identity, args);
        if let Some(value) = self.lookup(&fingerprint)? {
            debug!(identity, %fingerprint, "Cache hit");
            return Ok(CachedValue {
                value,
                from_cache: true,
            });
        }

        debug!(identity, %fingerprint, "Cache miss");
        let value = compute().await.map_err(MemoError::Call)?;
        self.persist(&fingerprint, &value)?;
        Ok(CachedValue {
            value,
            from_cache: false,
        })
    }

    /// Reads the live entry for `fingerprint`, healing corrupt ones
    fn lookup<T: DeserializeOwned>(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<T>, CacheError> {
        let Some(file_name) = self.store.find_live(fingerprint)? else {
            return Ok(None);
        };
        match self.store.read(&file_name) {
            Ok(value) => Ok(Some(value)),
            Err(ReadError::Decode(e)) => {
                warn!(file = %file_name, error = %e, "Removing undecodable cache entry");
                self.store.remove(&file_name)?;
                Ok(None)
            }
            Err(ReadError::Vanished) => Ok(None),
            Err(ReadError::Cache(e)) => Err(e),
        }
    }

    fn persist<T: Serialize>(
        &self,
        fingerprint: &Fingerprint,
        value: &T,
    ) -> Result<(), CacheError> {
        match self.store.write(fingerprint, value) {
            Ok(_) => Ok(()),
            Err(CacheError::Encode(e)) => {
                warn!(%fingerprint, error = %e, "Result is not cacheable, returning it uncached");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// A function whose results are served from the cache
#[derive(Debug, Clone)]
pub struct Memoized<F> {
    memoizer: Memoizer,
    identity: String,
    f: F,
}

impl<F> Memoized<F> {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Calls the wrapped function, or returns its stored result for `args`
    pub fn call<T, E>(&self, args: &CallArgs) -> Result<T, MemoError<E>>
    where
        F: Fn(&CallArgs) -> Result<T, E>,
        T: Serialize + DeserializeOwned,
    {
        self.memoizer
            .get_or_compute(&self.identity, args, || (self.f)(args))
    }
}
