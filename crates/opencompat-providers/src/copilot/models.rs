use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tracing::{debug, warn};

use opencompat_protocol::openai::response::Model;
use opencompat_provider_core::{ProviderError, ProviderResult};
use opencompat_store::disk_cache::{self, CacheMeta};

use crate::copilot::client::CopilotClient;
use crate::copilot::config::{
    COPILOT_INTEGRATION_ID, EDITOR_PLUGIN_VERSION, EDITOR_VERSION, MODELS_DISK_TTL_SECS,
    MODELS_URL, USER_AGENT_PRODUCT, USER_AGENT_VERSION,
};
use crate::http::{SharedClientKind, build_user_agent, shared_client};

const MODELS_CACHE_FILE: &str = "models.json";

#[derive(Default)]
struct Inner {
    models: Vec<Model>,
    model_ids: HashSet<String>,
    fetched_at: i64,
}

struct RefreshTask {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Cache over the dynamic upstream model directory.
///
/// The in-memory list refreshes synchronously under the write lock once its
/// age passes the TTL; the background task does the same on a timer. Both
/// fall back to the disk copy, and an empty result means "requires login"
/// to callers upstream.
pub struct ModelsCache {
    inner: RwLock<Inner>,
    client: Arc<CopilotClient>,
    cache_ttl: Duration,
    cache_dir: PathBuf,
    refresh_task: Mutex<Option<RefreshTask>>,
}

impl ModelsCache {
    pub fn new(client: Arc<CopilotClient>, cache_dir: PathBuf, refresh_mins: u64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            client,
            cache_ttl: Duration::from_secs(refresh_mins * 60),
            cache_dir,
            refresh_task: Mutex::new(None),
        }
    }

    fn is_fresh(&self, inner: &Inner) -> bool {
        !inner.models.is_empty()
            && OffsetDateTime::now_utc().unix_timestamp() - inner.fetched_at
                < self.cache_ttl.as_secs() as i64
    }

    pub async fn get_models(self: Arc<Self>) -> Vec<Model> {
        {
            let inner = self.inner.read().await;
            if self.is_fresh(&inner) {
                return inner.models.clone();
            }
        }

        let mut inner = self.inner.write().await;
        if self.is_fresh(&inner) {
            return inner.models.clone();
        }

        match self.fetch_from_api().await {
            Ok(models) => {
                update_cache(&mut inner, models);
                self.save_to_disk_async(inner.models.clone());
                inner.models.clone()
            }
            Err(err) => {
                warn!(provider = "copilot", error = %err, "failed to fetch models from api");
                match self.load_from_disk() {
                    Ok(models) if !models.is_empty() => {
                        debug!(provider = "copilot", "using cached models from disk");
                        update_cache(&mut inner, models);
                        inner.models.clone()
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    pub async fn supports_model(self: Arc<Self>, model_id: &str) -> bool {
        {
            let inner = self.inner.read().await;
            if !inner.model_ids.is_empty() {
                return inner.model_ids.contains(model_id);
            }
        }
        // Lazy populate, then answer from the set.
        self.clone().get_models().await;
        self.inner.read().await.model_ids.contains(model_id)
    }

    /// Forced synchronous refresh.
    pub async fn refresh(self: Arc<Self>) -> ProviderResult<()> {
        let models = self.fetch_from_api().await?;
        let mut inner = self.inner.write().await;
        update_cache(&mut inner, models);
        self.save_to_disk_async(inner.models.clone());
        Ok(())
    }

    /// Start the periodic refresh task. Idempotent; a second call is a no-op.
    pub fn start_background_refresh(self: Arc<Self>) {
        if self.cache_ttl.is_zero() {
            return;
        }
        let mut guard = self.refresh_task.lock().expect("refresh task lock poisoned");
        if guard.is_some() {
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let cache = self.clone();
        let interval = self.cache_ttl;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.changed() => {
                        debug!(provider = "copilot", "background models refresh stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        debug!(provider = "copilot", "background models refresh triggered");
                        if let Err(err) = cache.clone().refresh().await {
                            warn!(provider = "copilot", error = %err, "failed to refresh models");
                        }
                    }
                }
            }
        });

        *guard = Some(RefreshTask { stop, handle });
        debug!(provider = "copilot", ?interval, "background models refresh started");
    }

    /// Stop the background task and wait for it. Safe to call without a
    /// prior start, and safe to call twice.
    pub async fn stop_background_refresh(&self) {
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

    async fn fetch_from_api(&self) -> ProviderResult<Vec<Model>> {
        #[derive(Deserialize)]
        struct Directory {
            #[serde(default)]
            data: Vec<DirectoryModel>,
        }
        #[derive(Deserialize)]
        struct DirectoryModel {
            id: String,
            #[serde(default)]
            vendor: String,
        }

        let token = self.client.api_token().await?;
        let client = shared_client(SharedClientKind::Control)?;
        let resp = client
            .get(MODELS_URL)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/json")
            .header("User-Agent", build_user_agent(USER_AGENT_PRODUCT, USER_AGENT_VERSION))
            .header("Editor-Version", EDITOR_VERSION)
            .header("Editor-Plugin-Version", EDITOR_PLUGIN_VERSION)
            .header("Copilot-Integration-Id", COPILOT_INTEGRATION_ID)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(format!("failed to fetch models: {err}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(ProviderError::upstream(
                status,
                format!(
                    "models request failed with status {status}: {}",
                    String::from_utf8_lossy(&body)
                ),
            ));
        }

        let raw = resp
            .bytes()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        let directory: Directory = serde_json::from_slice(&raw)
            .map_err(|err| ProviderError::Invalid(format!("failed to parse models response: {err}")))?;

        let models: Vec<Model> = directory
            .data
            .into_iter()
            .map(|entry| {
                let owned_by = if entry.vendor.is_empty() {
                    "unknown".to_string()
                } else {
                    entry.vendor
                };
                Model::new(entry.id, owned_by)
            })
            .collect();

        if models.is_empty() {
            return Err(ProviderError::Invalid("no models returned from api".to_string()));
        }
        Ok(models)
    }

    fn save_to_disk_async(&self, models: Vec<Model>) {
        let dir = self.cache_dir.clone();
        tokio::spawn(async move {
            let content = match serde_json::to_vec(&models) {
                Ok(content) => content,
                Err(err) => {
                    warn!(error = %err, "failed to marshal models cache");
                    return;
                }
            };
            if let Err(err) = disk_cache::save(&dir, MODELS_CACHE_FILE, &content, &CacheMeta::now(""))
            {
                warn!(error = %err, "failed to write models cache");
            }
        });
    }

    fn load_from_disk(&self) -> std::io::Result<Vec<Model>> {
        let (content, meta) = disk_cache::load(&self.cache_dir, MODELS_CACHE_FILE)?;
        if meta.is_stale(MODELS_DISK_TTL_SECS) {
            warn!(provider = "copilot", age_secs = meta.age_secs(), "models disk cache expired");
        }
        serde_json::from_slice(&content)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

fn update_cache(inner: &mut Inner, models: Vec<Model>) {
    inner.model_ids = models.iter().map(|model| model.id.clone()).collect();
    inner.models = models;
    inner.fetched_at = OffsetDateTime::now_utc().unix_timestamp();
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencompat_store::CredentialStore;

    fn temp_cache(tag: &str) -> Arc<ModelsCache> {
        let dir = std::env::temp_dir().join(format!("opencompat-models-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(CredentialStore::with_data_dir(dir.join("data")));
        Arc::new(ModelsCache::new(
            Arc::new(CopilotClient::new(store)),
            dir,
            24 * 60,
        ))
    }

    #[tokio::test]
    async fn fresh_cache_serves_membership_queries() {
        let cache = temp_cache("fresh");
        {
            let mut inner = cache.inner.write().await;
            update_cache(
                &mut inner,
                vec![Model::new("gpt-4o", "openai"), Model::new("claude-sonnet", "anthropic")],
            );
        }

        assert!(cache.clone().supports_model("gpt-4o").await);
        assert!(!cache.clone().supports_model("unknown-model").await);
        assert_eq!(cache.get_models().await.len(), 2);
    }

    #[tokio::test]
    async fn no_credentials_and_no_disk_yields_empty() {
        let cache = temp_cache("empty");
        // Not logged in, nothing on disk: callers see an empty list.
        assert!(cache.get_models().await.is_empty());
    }

    #[tokio::test]
    async fn disk_fallback_when_api_unreachable() {
        let cache = temp_cache("disk");
        let models = vec![Model::new("gpt-4o-mini", "openai")];
        disk_cache::save(
            &cache.cache_dir,
            MODELS_CACHE_FILE,
            &serde_json::to_vec(&models).expect("marshal"),
            &CacheMeta::now(""),
        )
        .expect("seed disk");

        let loaded = cache.clone().get_models().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "gpt-4o-mini");
        assert!(cache.supports_model("gpt-4o-mini").await);
    }

    #[tokio::test]
    async fn stop_is_safe_from_both_directions() {
        let cache = temp_cache("stop");
        cache.stop_background_refresh().await;
        cache.clone().start_background_refresh();
        cache.clone().start_background_refresh();
        cache.stop_background_refresh().await;
        cache.stop_background_refresh().await;
    }
}
