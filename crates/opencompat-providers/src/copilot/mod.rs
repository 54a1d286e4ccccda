use std::sync::Arc;

use async_trait::async_trait;

use opencompat_protocol::openai::error::parse_upstream_error;
use opencompat_protocol::openai::response::Model;
use opencompat_provider_core::{
    ChatRequest, ChatStream, Provider, ProviderError, ProviderMeta, ProviderResult,
};
use opencompat_store::{AuthMethod, CredentialStore, paths};

pub mod client;
pub mod config;
pub mod models;
pub mod stream;

use client::CopilotClient;
use config::Config;
use models::ModelsCache;
use stream::CopilotStream;

pub fn meta() -> ProviderMeta {
    ProviderMeta {
        id: config::PROVIDER_ID,
        display_name: "GitHub Copilot",
        auth_method: AuthMethod::DeviceFlow,
        oauth_cfg: None,
        device_cfg: Some(config::device_flow_config()),
        env_vars: vec![opencompat_provider_core::EnvVarDoc {
            name: config::ENV_MODELS_REFRESH,
            description: "Models refresh interval in minutes",
            default: config::DEFAULT_MODELS_REFRESH_MINS.to_string(),
        }],
        factory: new_provider,
    }
}

fn new_provider(store: Arc<CredentialStore>) -> ProviderResult<Arc<dyn Provider>> {
    let cfg = Config::from_env();
    let client = Arc::new(CopilotClient::new(store));
    let models_cache = Arc::new(ModelsCache::new(
        client.clone(),
        paths::cache_dir().join(config::PROVIDER_ID),
        cfg.models_refresh_mins,
    ));
    Ok(Arc::new(CopilotProvider {
        client,
        models_cache,
    }))
}

pub struct CopilotProvider {
    client: Arc<CopilotClient>,
    models_cache: Arc<ModelsCache>,
}

#[async_trait]
impl Provider for CopilotProvider {
    fn id(&self) -> &'static str {
        config::PROVIDER_ID
    }

    async fn models(&self) -> Vec<Model> {
        self.models_cache.clone().get_models().await
    }

    async fn supports_model(&self, model_id: &str) -> bool {
        self.models_cache.clone().supports_model(model_id).await
    }

    async fn chat_completion(&self, req: ChatRequest) -> ProviderResult<Box<dyn ChatStream>> {
        let resp = self.client.send_request(&req).await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(ProviderError::upstream(status, parse_upstream_error(&body)));
        }

        let include_usage = req.include_usage();
        Ok(Box::new(CopilotStream::new(resp, req.stream, include_usage)))
    }

    /// Warm the model cache; failures here are tolerable (the list reloads
    /// lazily on the first request).
    async fn init(&self) -> ProviderResult<()> {
        let _ = self.models_cache.clone().get_models().await;
        Ok(())
    }

    fn start(&self) {
        self.models_cache.clone().start_background_refresh();
    }

    async fn close(&self) {
        self.models_cache.stop_background_refresh().await;
    }

    async fn refresh_models(&self) -> ProviderResult<()> {
        self.models_cache.clone().refresh().await
    }
}
