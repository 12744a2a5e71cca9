//! Two-tier response cache for generated insight sets.
//!
//! - **Fast tier**: in-process map with a TTL and a capacity bound; the
//!   oldest entry is evicted when full.
//! - **Durable tier**: one JSON file per key under the cache directory,
//!   evicted only by age via [`ResponseCache::cleanup`].
//!
//! Keys are content-addressed: SHA-256 over a content sample, the prompt set
//! hash (which folds in the template version) and the backend name.
//!
//! Every failure inside this module is logged and swallowed. A broken cache
//! behaves like an empty one.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::categories::{prompt_set_hash, Category};
use crate::config::CacheConfig;
use crate::error::PipelineError;
use crate::text::head;

/// Characters of content that feed the cache key.
pub const KEY_SAMPLE_CHARS: usize = 50_000;

pub type InsightMap = BTreeMap<Category, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub fast_entries: usize,
    pub durable_entries: usize,
    pub durable_bytes: u64,
}

struct FastEntry {
    inserted: Instant,
    insights: InsightMap,
}

#[derive(Serialize, Deserialize)]
struct DurableEntry {
    created_at: DateTime<Utc>,
    insights: BTreeMap<String, String>,
}

pub struct ResponseCache {
    fast: Mutex<HashMap<String, FastEntry>>,
    dir: PathBuf,
    ttl: Duration,
    capacity: usize,
    prompt_hash: String,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            fast: Mutex::new(HashMap::new()),
            dir: config.dir.clone(),
            ttl: Duration::from_secs(config.memory_ttl_secs),
            capacity: config.memory_capacity.max(1),
            prompt_hash: prompt_set_hash(),
        }
    }

    /// Cache key for `content` generated by `backend`.
    pub fn key(&self, content: &str, backend: &str) -> String {
        compute_key(content, &self.prompt_hash, backend)
    }

    fn fast(&self) -> MutexGuard<'_, HashMap<String, FastEntry>> {
        self.fast.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub async fn get(&self, key: &str) -> Option<InsightMap> {
        {
            let mut fast = self.fast();
            if let Some(entry) = fast.get(key) {
                if entry.inserted.elapsed() <= self.ttl {
                    debug!(key, "Fast cache hit");
                    return Some(entry.insights.clone());
                }
                fast.remove(key);
            }
        }

        match self.read_durable(key).await {
            Ok(Some(insights)) => {
                debug!(key, "Durable cache hit, promoting");
                self.insert_fast(key, insights.clone());
                Some(insights)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, insights: &InsightMap) {
        if insights.is_empty() {
            return;
        }
        self.insert_fast(key, insights.clone());
        if let Err(e) = self.write_durable(key, insights).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    fn insert_fast(&self, key: &str, insights: InsightMap) {
        let mut fast = self.fast();
        fast.retain(|_, e| e.inserted.elapsed() <= self.ttl);
        if !fast.contains_key(key) && fast.len() >= self.capacity {
            let oldest = fast
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                fast.remove(&oldest);
            }
        }
        fast.insert(
            key.to_string(),
            FastEntry {
                inserted: Instant::now(),
                insights,
            },
        );
    }

    async fn read_durable(&self, key: &str) -> Result<Option<InsightMap>, PipelineError> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::Cache(format!("{}: {}", path.display(), e))),
        };
        let entry: DurableEntry = serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::Cache(format!("{}: {}", path.display(), e)))?;
        let insights = entry
            .insights
            .into_iter()
            .filter_map(|(k, v)| k.parse::<Category>().ok().map(|c| (c, v)))
            .collect();
        Ok(Some(insights))
    }

    async fn write_durable(&self, key: &str, insights: &InsightMap) -> Result<(), PipelineError> {
        let cache_err = |e: std::io::Error| PipelineError::Cache(e.to_string());
        tokio::fs::create_dir_all(&self.dir).await.map_err(cache_err)?;

        let entry = DurableEntry {
            created_at: Utc::now(),
            insights: insights
                .iter()
                .map(|(c, v)| (c.key().to_string(), v.clone()))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&entry).map_err(|e| PipelineError::Cache(e.to_string()))?;

        let tmp = self.dir.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, json).await.map_err(cache_err)?;
        tokio::fs::rename(&tmp, self.entry_path(key))
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    /// Delete durable entries older than `max_age_days`. Returns how many
    /// were removed.
    pub async fn cleanup(&self, max_age_days: u32) -> usize {
        match self.cleanup_inner(max_age_days).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "Removed expired cache entries");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Cache cleanup failed");
                0
            }
        }
    }

    async fn cleanup_inner(&self, max_age_days: u32) -> Result<usize, PipelineError> {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::Cache(e.to_string())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::Cache(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let created = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<DurableEntry>(&bytes)
                    .map(|e| e.created_at)
                    .ok(),
                Err(_) => None,
            };
            let created = match created {
                Some(ts) => ts,
                None => match entry.metadata().await.and_then(|m| m.modified()) {
                    Ok(modified) => DateTime::<Utc>::from(modified),
                    Err(_) => continue,
                },
            };
            if created < cutoff {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Could not remove cache entry");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        let fast_entries = {
            let fast = self.fast();
            fast.values()
                .filter(|e| e.inserted.elapsed() <= self.ttl)
                .count()
        };
        let mut stats = CacheStats {
            fast_entries,
            durable_entries: 0,
            durable_bytes: 0,
        };
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return stats;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                stats.durable_entries += 1;
                stats.durable_bytes += meta.len();
            }
        }
        stats
    }
}

pub fn compute_key(content: &str, prompt_hash: &str, backend: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(head(content, KEY_SAMPLE_CHARS).as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt_hash.as_bytes());
    hasher.update([0u8]);
    hasher.update(backend.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn cache_in(dir: &Path, capacity: usize, ttl_secs: u64) -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            dir: dir.to_path_buf(),
            memory_ttl_secs: ttl_secs,
            memory_capacity: capacity,
            max_age_days: 7,
        })
    }

    fn sample() -> InsightMap {
        let mut map = InsightMap::new();
        map.insert(Category::BusinessSummary, "<p>Sells widgets</p>".to_string());
        map.insert(Category::RedFlags, "<p>Severity: Low</p>".to_string());
        map
    }

    #[tokio::test]
    async fn round_trip_returns_identical_map() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(tmp.path(), 10, 3600);
        let key = cache.key("document text", "openai");
        cache.put(&key, &sample()).await;
        assert_eq!(cache.get(&key).await, Some(sample()));
    }

    #[test]
    fn key_changes_with_every_input() {
        let base = compute_key("content", "prompts-v1", "openai");
        assert_ne!(base, compute_key("content!", "prompts-v1", "openai"));
        assert_ne!(base, compute_key("content", "prompts-v2", "openai"));
        assert_ne!(base, compute_key("content", "prompts-v1", "ollama"));
        assert_eq!(base, compute_key("content", "prompts-v1", "openai"));
    }

    #[test]
    fn key_only_samples_the_head() {
        let long = "a".repeat(KEY_SAMPLE_CHARS);
        let a = compute_key(&format!("{}tail-one", long), "p", "b");
        let b = compute_key(&format!("{}tail-two", long), "p", "b");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn durable_tier_survives_a_new_instance() {
        let tmp = TempDir::new().unwrap();
        let key = {
            let cache = cache_in(tmp.path(), 10, 3600);
            let key = cache.key("persisted", "openai");
            cache.put(&key, &sample()).await;
            key
        };
        let fresh = cache_in(tmp.path(), 10, 3600);
        assert_eq!(fresh.stats().await.fast_entries, 0);
        assert_eq!(fresh.get(&key).await, Some(sample()));
        // Promoted into the fast tier.
        assert_eq!(fresh.stats().await.fast_entries, 1);
    }

    #[tokio::test]
    async fn fast_tier_evicts_oldest_at_capacity() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(tmp.path(), 2, 3600);
        for key in ["k1", "k2", "k3"] {
            cache.put(key, &sample()).await;
        }
        let stats = cache.stats().await;
        assert_eq!(stats.fast_entries, 2);
        assert_eq!(stats.durable_entries, 3);
        assert!(stats.durable_bytes > 0);
    }

    #[tokio::test]
    async fn corrupt_entries_read_as_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(tmp.path(), 10, 3600);
        std::fs::write(tmp.path().join("broken.json"), b"{not json").unwrap();
        assert_eq!(cache.get("broken").await, None);
    }

    #[tokio::test]
    async fn cleanup_removes_old_entries_only() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(tmp.path(), 10, 3600);
        cache.put("fresh", &sample()).await;
        let old = DurableEntry {
            created_at: Utc::now() - chrono::Duration::days(30),
            insights: BTreeMap::new(),
        };
        std::fs::write(tmp.path().join("old.json"), serde_json::to_vec(&old).unwrap()).unwrap();

        assert_eq!(cache.cleanup(7).await, 1);
        assert!(tmp.path().join("fresh.json").exists());
        assert!(!tmp.path().join("old.json").exists());
    }
}
