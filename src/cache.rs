//! Caller-owned query caching.
//!
//! Nothing in the scoring or planning code reads a cache. Callers wrap a
//! collaborator (for example [`CachedRegistry`]) when they want memoization,
//! and every miss replays the uncached path.

use crate::errors::AppError;
use crate::models::{CityCount, IndustryCode};
use crate::registry::{LeadQuery, LeadSearch, RegistryQuery};
use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Key/value cache with TTL and explicit invalidation.
#[async_trait]
pub trait QueryCache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V>;
    async fn insert(&self, key: String, value: V);
    async fn invalidate(&self, key: &str);
    fn invalidate_all(&self);
}

/// In-process cache backed by `moka`.
#[derive(Clone)]
pub struct MokaQueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<String, V>,
}

impl<V> MokaQueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    /// Cache bounded by total weight instead of entry count.
    pub fn weighted<W>(ttl: Duration, max_weight: u64, weigher: W) -> Self
    where
        W: Fn(&V) -> u32 + Send + Sync + 'static,
    {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_weight)
                .weigher(move |_key: &String, value: &V| weigher(value))
                .build(),
        }
    }
}

/// Total leads held by the registry search cache.
pub const SEARCH_CACHE_MAX_LEADS: u64 = 200_000;

/// Weight of a cached search: one unit per lead, at least one.
pub fn lead_search_weight(search: &LeadSearch) -> u32 {
    u32::try_from(search.leads.len()).unwrap_or(u32::MAX).max(1)
}

#[async_trait]
impl<V> QueryCache<V> for MokaQueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await
    }

    async fn insert(&self, key: String, value: V) {
        self.inner.insert(key, value).await;
    }

    async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

/// Cache that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl<V> QueryCache<V> for NoCache
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> Option<V> {
        None
    }

    async fn insert(&self, _key: String, _value: V) {}

    async fn invalidate(&self, _key: &str) {}

    fn invalidate_all(&self) {}
}

/// SHA-256 hex digest of the given parts, separated so that
/// `["ab", "c"]` and `["a", "bc"]` differ.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// Cache key of a normalized lead query.
pub fn lead_query_key(query: &LeadQuery) -> String {
    let mut codes = query.codes.clone();
    codes.sort();
    let limit = query.limit.to_string();
    fingerprint(&[
        "search_by_codes",
        &codes.join(","),
        query.region.as_deref().unwrap_or(""),
        query.city.as_deref().unwrap_or(""),
        if query.headquarters_only { "hq" } else { "all" },
        &limit,
    ])
}

/// Registry decorator memoizing code searches.
///
/// Only successful searches are cached; a registry fault is never remembered.
pub struct CachedRegistry<R> {
    inner: R,
    cache: Arc<dyn QueryCache<LeadSearch>>,
}

impl<R: RegistryQuery> CachedRegistry<R> {
    pub fn new(inner: R, cache: Arc<dyn QueryCache<LeadSearch>>) -> Self {
        Self { inner, cache }
    }

    /// Drops every memoized search, e.g. after a registry reload.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl<R: RegistryQuery> RegistryQuery for CachedRegistry<R> {
    async fn search_by_codes(&self, query: &LeadQuery) -> Result<LeadSearch, AppError> {
        let normalized = query.clone().normalized()?;
        let key = lead_query_key(&normalized);

        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!("Registry cache hit ({} leads)", hit.leads.len());
            return Ok(hit);
        }

        let result = self.inner.search_by_codes(&normalized).await?;
        self.cache.insert(key, result.clone()).await;
        Ok(result)
    }

    async fn search_text(&self, term: &str, limit: usize) -> Result<Vec<IndustryCode>, AppError> {
        self.inner.search_text(term, limit).await
    }

    async fn list_cities(&self, region: Option<&str>) -> Result<Vec<String>, AppError> {
        self.inner.list_cities(region).await
    }

    async fn top_cities(
        &self,
        codes: &[String],
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CityCount>, AppError> {
        self.inner.top_cities(codes, region, limit).await
    }
}
