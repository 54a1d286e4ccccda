use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use opencompat_protocol::openai::response::Model;
use opencompat_store::{AuthMethod, CredentialStore, DeviceFlowConfig, OAuthConfig};

use crate::errors::ProviderResult;
use crate::provider::Provider;

pub type ProviderFactory =
    fn(Arc<CredentialStore>) -> ProviderResult<Arc<dyn Provider>>;

#[derive(Debug, Clone)]
pub struct EnvVarDoc {
    pub name: &'static str,
    pub description: &'static str,
    pub default: String,
}

/// Static description of a provider type, registered at startup.
#[derive(Clone)]
pub struct ProviderMeta {
    pub id: &'static str,
    pub display_name: &'static str,
    pub auth_method: AuthMethod,
    pub oauth_cfg: Option<OAuthConfig>,
    pub device_cfg: Option<DeviceFlowConfig>,
    pub env_vars: Vec<EnvVarDoc>,
    pub factory: ProviderFactory,
}

/// Routing failure for a client-supplied model string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Model string has no `<provider>/` prefix.
    MissingPrefix,
    UnknownProvider(String),
    /// Provider is known but has no credentials on disk.
    NotLoggedIn(String),
}

/// Split `"chatgpt/gpt-5-codex"` into `("chatgpt", "gpt-5-codex")`.
pub fn parse_model(model: &str) -> Result<(&str, &str), RouteError> {
    match model.find('/') {
        Some(idx) => Ok((&model[..idx], &model[idx + 1..])),
        None => Err(RouteError::MissingPrefix),
    }
}

/// Holds every known provider type plus the active (logged-in) instances.
#[derive(Default)]
pub struct Registry {
    metas: BTreeMap<&'static str, ProviderMeta>,
    providers: BTreeMap<&'static str, Arc<dyn Provider>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_meta(&mut self, meta: ProviderMeta) {
        self.metas.insert(meta.id, meta);
    }

    /// Instantiate providers for every id with credentials on disk.
    pub fn initialize(&mut self, store: &Arc<CredentialStore>) -> ProviderResult<()> {
        for (id, meta) in &self.metas {
            if !store.is_logged_in(id) {
                debug!(provider = *id, "skipping provider without credentials");
                continue;
            }
            let provider = (meta.factory)(store.clone())?;
            self.providers.insert(*id, provider);
        }
        Ok(())
    }

    /// Activate an already-built provider instance directly. `initialize`
    /// is the usual path; this exists for wiring stubs in tests.
    pub fn activate(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn meta(&self, provider_id: &str) -> Option<&ProviderMeta> {
        self.metas.get(provider_id)
    }

    pub fn metas(&self) -> impl Iterator<Item = &ProviderMeta> {
        self.metas.values()
    }

    pub fn active(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn active_providers(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.values()
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Resolve a prefixed model string to its active provider and bare model
    /// id. Does not check model support; callers do that against the
    /// provider so the error can name the full model string.
    pub fn provider_for_model(
        &self,
        model: &str,
    ) -> Result<(Arc<dyn Provider>, String), RouteError> {
        let (provider_id, model_id) = parse_model(model)?;
        match self.providers.get(provider_id) {
            Some(provider) => Ok((provider.clone(), model_id.to_string())),
            None => {
                if self.metas.contains_key(provider_id) {
                    Err(RouteError::NotLoggedIn(provider_id.to_string()))
                } else {
                    Err(RouteError::UnknownProvider(provider_id.to_string()))
                }
            }
        }
    }

    /// Union of models across active providers, `<pid>/` prefixed, sorted.
    pub async fn all_models(&self) -> Vec<Model> {
        let mut models = Vec::new();
        for provider in self.providers.values() {
            for mut model in provider.models().await {
                model.id = format!("{}/{}", provider.id(), model.id);
                models.push(model);
            }
        }
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub async fn init_all(&self) -> ProviderResult<()> {
        for provider in self.providers.values() {
            provider.init().await?;
        }
        Ok(())
    }

    pub fn start_all(&self) {
        for provider in self.providers.values() {
            provider.start();
        }
    }

    pub async fn close_all(&self) {
        for provider in self.providers.values() {
            provider.close().await;
        }
    }
}
