//! Memoization of adapted delegates.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use log::debug;
use rayon::prelude::*;

use crate::{
    adapter::{config::AdapterConfig, method::MethodAdapter},
    metadata::{
        method::MethodRc, registry::TypeRegistry, signature::DelegateSignature, token::Token,
    },
    runtime::AdaptedDelegate,
    Result,
};

type CacheKey = (Token, DelegateSignature);

/// Thread-safe cache of adapted delegates keyed by (method token, signature).
///
/// Requesting the same adaptation twice returns the same delegate. When two threads
/// adapt the same pair concurrently both build a body, but the first one stored is the
/// one every caller gets. Failures are not cached.
///
/// ```rust
/// use std::sync::Arc;
/// use dotreflect::prelude::*;
///
/// let registry = TypeRegistry::new();
/// let text = CilType::class("Demo", "Text").extends(&registry.object()).build();
/// let length = MethodDesc::builder("Length", &text)
///     .static_method()
///     .param("value", &registry.string())
///     .returns(&registry.int32())
///     .native(|_, _| Ok(Some(EmValue::I32(0))))
///     .build();
/// let shape = DelegateSignature::new(&registry.int32(), vec![SignatureParam::value(&registry.string())]);
///
/// let cache = DelegateCache::new(registry);
/// let first = cache.get_or_adapt(&length, &shape)?;
/// let second = cache.get_or_adapt(&length, &shape)?;
/// assert!(Arc::ptr_eq(&first, &second));
/// # Ok::<(), dotreflect::Error>(())
/// ```
#[derive(Debug)]
pub struct DelegateCache {
    registry: TypeRegistry,
    config: AdapterConfig,
    entries: DashMap<CacheKey, Arc<AdaptedDelegate>>,
}

impl DelegateCache {
    /// Creates an empty cache that adapts with the default configuration.
    #[must_use]
    pub fn new(registry: TypeRegistry) -> Self {
        Self::with_config(registry, AdapterConfig::default())
    }

    /// Creates an empty cache that adapts with `config`.
    #[must_use]
    pub fn with_config(registry: TypeRegistry, config: AdapterConfig) -> Self {
        DelegateCache {
            registry,
            config,
            entries: DashMap::new(),
        }
    }

    /// The registry used for adaptation
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Returns the cached delegate for `method` and `signature`, if any.
    #[must_use]
    pub fn get(&self, method: &MethodRc, signature: &DelegateSignature) -> Option<Arc<AdaptedDelegate>> {
        self.entries
            .get(&(method.token(), signature.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Returns the cached delegate, adapting and storing it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the adaptation error; nothing is stored in that case.
    pub fn get_or_adapt(
        &self,
        method: &MethodRc,
        signature: &DelegateSignature,
    ) -> Result<Arc<AdaptedDelegate>> {
        if let Some(cached) = self.get(method, signature) {
            return Ok(cached);
        }

        // adapt outside the shard lock
        let adapted = MethodAdapter::with_config(&self.registry, self.config.clone())
            .adapt(method, signature)?;

        match self.entries.entry((method.token(), signature.clone())) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                debug!("Caching adapted '{}' as {}", method, signature);
                Ok(Arc::clone(entry.insert(Arc::new(adapted)).value()))
            }
        }
    }

    /// Adapts a batch of pairs in parallel, in input order.
    pub fn adapt_all(
        &self,
        requests: &[(MethodRc, DelegateSignature)],
    ) -> Vec<Result<Arc<AdaptedDelegate>>> {
        requests
            .par_iter()
            .map(|(method, signature)| self.get_or_adapt(method, signature))
            .collect()
    }

    /// Number of cached delegates
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached delegate.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
