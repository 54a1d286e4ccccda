use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};

use opencompat_provider_core::{ProviderError, ProviderResult};
use opencompat_store::disk_cache::{self, CacheMeta};

use crate::chatgpt::config::{
    GITHUB_RAW_BASE_URL, GITHUB_RELEASES_API, INSTRUCTIONS_DISK_TTL_SECS,
};
use crate::chatgpt::models;
use crate::http::{SharedClientKind, shared_client};

#[derive(Debug, Clone)]
struct CacheEntry {
    content: String,
    fetched_at: i64,
}

struct RefreshTask {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Memory + disk cache for the per-model prompt files published in the
/// Codex repository. `prefetch` must succeed before the server takes
/// traffic; afterwards a single background task keeps entries fresh.
pub struct InstructionsCache {
    entries: RwLock<HashMap<&'static str, CacheEntry>>,
    version: RwLock<String>,
    refresh_interval: RwLock<Duration>,
    cache_dir: PathBuf,
    refresh_task: Mutex<Option<RefreshTask>>,
}

impl InstructionsCache {
    pub fn new(cache_dir: PathBuf, refresh_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            version: RwLock::new(String::new()),
            refresh_interval: RwLock::new(refresh_interval),
            cache_dir,
            refresh_task: Mutex::new(None),
        }
    }

    /// Fetch every known prompt file, falling back to the disk cache (even
    /// expired) per file. Fails only when a file has neither source.
    pub async fn prefetch(&self) -> ProviderResult<()> {
        let files = models::all_prompt_files();
        debug!(count = files.len(), "prefetching instruction files");

        let mut failures = Vec::new();
        for file in files {
            match self.prefetch_one(file).await {
                Ok(content) => {
                    self.store_entry(file, content);
                    debug!(file, "loaded instruction file");
                }
                Err(err) => failures.push(format!("{file}: {err}")),
            }
        }

        if !failures.is_empty() {
            return Err(ProviderError::Invalid(format!(
                "failed to prefetch instructions: {}",
                failures.join("; ")
            )));
        }
        Ok(())
    }

    async fn prefetch_one(&self, file: &'static str) -> ProviderResult<String> {
        match self.fetch_upstream(file).await {
            Ok(content) => {
                self.save_to_disk_async(file, content.clone());
                Ok(content)
            }
            Err(err) => {
                warn!(file, error = %err, "upstream fetch failed, trying disk cache");
                self.load_from_disk_allow_expired(file).map_err(|disk_err| {
                    ProviderError::Invalid(format!("upstream: {err}, disk cache: {disk_err}"))
                })
            }
        }
    }

    /// Start the single periodic refresh task. Idempotent.
    pub fn start_background_refresh(self: Arc<Self>, interval: Duration) {
        let mut guard = self.refresh_task.lock().expect("refresh task lock poisoned");
        if guard.is_some() {
            return;
        }
        *self.refresh_interval.write().expect("interval lock poisoned") = interval;

        let (stop, mut stopped) = watch::channel(false);
        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick duplicates prefetch; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.changed() => {
                        debug!("background instructions refresh stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        cache.refresh_tick().await;
                    }
                }
            }
        });

        *guard = Some(RefreshTask { stop, handle });
        debug!(?interval, "background instructions refresh started");
    }

    /// Stop the background task and wait for it to exit.
    pub async fn close(&self) {
        let task = self
            .refresh_task
            .lock()
            .expect("refresh task lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            let _ = task.handle.await;
        }
    }

    /// One background refresh round; failures keep the prior entry.
    async fn refresh_tick(&self) {
        let files = models::all_prompt_files();
        let mut refreshed = 0usize;
        for file in files.iter().copied() {
            match self.fetch_upstream(file).await {
                Ok(content) => {
                    self.store_entry(file, content.clone());
                    self.save_to_disk_async(file, content);
                    refreshed += 1;
                }
                Err(err) => {
                    warn!(file, error = %err, "failed to refresh instruction file");
                }
            }
        }
        debug!(refreshed, total = files.len(), "background instructions refresh complete");
    }

    /// Operator-initiated refresh: every file, synchronously; errors out if
    /// any file fails. Cancelling the caller aborts in-flight fetches.
    pub async fn refresh_all(&self) -> ProviderResult<()> {
        let mut failures = Vec::new();
        for file in models::all_prompt_files() {
            match self.fetch_upstream(file).await {
                Ok(content) => {
                    self.store_entry(file, content.clone());
                    self.save_to_disk_async(file, content);
                }
                Err(err) => failures.push(format!("{file}: {err}")),
            }
        }
        if !failures.is_empty() {
            return Err(ProviderError::Invalid(format!(
                "failed to refresh some instructions: {}",
                failures.join("; ")
            )));
        }
        Ok(())
    }

    /// Instructions for a model. Fresh memory entries return directly; a
    /// stale entry is returned as-is while a background task refreshes it;
    /// a missing entry falls back to disk and then upstream.
    pub async fn get(self: Arc<Self>, model_id: &str) -> ProviderResult<String> {
        let file = models::prompt_file(model_id);
        let refresh_interval = *self.refresh_interval.read().expect("interval lock poisoned");

        let entry = {
            let entries = self.entries.read().expect("instruction cache poisoned");
            entries.get(file).cloned()
        };

        if let Some(entry) = entry {
            let age = OffsetDateTime::now_utc().unix_timestamp() - entry.fetched_at;
            if age < refresh_interval.as_secs() as i64 {
                return Ok(entry.content);
            }

            // Stale: serve the old copy and refresh off the request path.
            let cache = self.clone();
            tokio::spawn(async move {
                match cache.fetch_upstream(file).await {
                    Ok(content) => {
                        cache.store_entry(file, content.clone());
                        cache.save_to_disk_async(file, content);
                    }
                    Err(err) => warn!(file, error = %err, "failed to refresh instructions"),
                }
            });
            return Ok(entry.content);
        }

        // Nothing in memory: should only happen when prefetch was skipped.
        if let Ok(content) = self.load_from_disk_allow_expired(file) {
            self.store_entry(file, content.clone());
            return Ok(content);
        }

        let content = self.fetch_upstream(file).await?;
        self.store_entry(file, content.clone());
        self.save_to_disk_async(file, content.clone());
        Ok(content)
    }

    fn store_entry(&self, file: &'static str, content: String) {
        let mut entries = self.entries.write().expect("instruction cache poisoned");
        entries.insert(
            file,
            CacheEntry {
                content,
                fetched_at: OffsetDateTime::now_utc().unix_timestamp(),
            },
        );
    }

    fn save_to_disk_async(&self, file: &str, content: String) {
        let dir = self.cache_dir.clone();
        let version = self.version.read().expect("version lock poisoned").clone();
        let file = file.to_string();
        tokio::spawn(async move {
            let meta = CacheMeta::now(version);
            if let Err(err) = disk_cache::save(&dir, &file, content.as_bytes(), &meta) {
                warn!(file = %file, error = %err, "failed to save instruction to disk cache");
            }
        });
    }

    fn load_from_disk_allow_expired(&self, file: &str) -> Result<String, std::io::Error> {
        let (content, meta) = disk_cache::load(&self.cache_dir, file)?;
        if meta.is_stale(INSTRUCTIONS_DISK_TTL_SECS) {
            warn!(file, age_secs = meta.age_secs(), "instructions disk cache expired, using anyway");
        }
        String::from_utf8(content)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    async fn fetch_upstream(&self, file: &str) -> ProviderResult<String> {
        // Prompts live at codex-rs/core/<file> in the tagged release tree;
        // fall back to the main branch when the release lookup fails.
        let tag = match self.latest_release_tag().await {
            Ok(tag) => tag,
            Err(_) => "main".to_string(),
        };
        *self.version.write().expect("version lock poisoned") = tag.clone();

        let url = format!("{GITHUB_RAW_BASE_URL}/{tag}/codex-rs/core/{file}");
        let client = shared_client(SharedClientKind::Control)?;
        let resp = client
            .get(&url)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(format!("failed to fetch instructions: {err}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ProviderError::Invalid(format!(
                "failed to fetch instructions: status {status}"
            )));
        }
        resp.text()
            .await
            .map_err(|err| ProviderError::Transport(format!("failed to read instructions: {err}")))
    }

    async fn latest_release_tag(&self) -> ProviderResult<String> {
        #[derive(Deserialize)]
        struct Release {
            #[serde(default)]
            tag_name: String,
        }

        let client = shared_client(SharedClientKind::Control)?;
        let resp = client
            .get(GITHUB_RELEASES_API)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ProviderError::Invalid(format!(
                "failed to fetch releases: status {status}"
            )));
        }

        let raw = resp
            .bytes()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        let release: Release =
            serde_json::from_slice(&raw).map_err(|err| ProviderError::Invalid(err.to_string()))?;
        if release.tag_name.is_empty() {
            return Err(ProviderError::Invalid("no tag name in release".to_string()));
        }
        Ok(release.tag_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(tag: &str) -> Arc<InstructionsCache> {
        let dir = std::env::temp_dir().join(format!(
            "opencompat-instructions-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(InstructionsCache::new(dir, Duration::from_secs(24 * 3600)))
    }

    #[tokio::test]
    async fn fresh_memory_entry_served_without_network() {
        let cache = temp_cache("fresh");
        cache.store_entry("gpt_5_1_prompt.md", "cached instructions".to_string());
        let content = cache.get("gpt-5.1").await.expect("get");
        assert_eq!(content, "cached instructions");
    }

    #[tokio::test]
    async fn missing_entry_falls_back_to_expired_disk() {
        let cache = temp_cache("disk");
        let meta = CacheMeta {
            version: "v1".to_string(),
            // Far beyond the 7 day TTL; still usable.
            fetched_at: OffsetDateTime::now_utc().unix_timestamp() - 30 * 24 * 3600,
        };
        disk_cache::save(&cache.cache_dir, "gpt_5_1_prompt.md", b"old prompt", &meta)
            .expect("seed disk");

        let content = cache.get("gpt-5").await.expect("get");
        assert_eq!(content, "old prompt");
    }

    #[tokio::test]
    async fn model_maps_to_prompt_file_via_static_table() {
        let cache = temp_cache("mapping");
        cache.store_entry("gpt_5_codex_prompt.md", "codex prompt".to_string());
        // gpt-5.1-codex and gpt-5-codex share the same prompt file.
        assert_eq!(
            cache.clone().get("gpt-5.1-codex").await.expect("get"),
            "codex prompt"
        );
        assert_eq!(
            cache.clone().get("gpt-5-codex").await.expect("get"),
            "codex prompt"
        );
        // Unknown models use the default codex prompt file.
        assert_eq!(cache.get("mystery").await.expect("get"), "codex prompt");
    }

    #[tokio::test]
    async fn close_without_start_is_a_noop() {
        let cache = temp_cache("close");
        cache.close().await;
    }
}
