use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use time::OffsetDateTime;
use tracing::debug;

use crate::credentials::{
    ApiKeyCredentials, OAuthConfig, OAuthCredentials, OAuthErrorBody, TokenData,
};
use crate::paths;

#[derive(Debug)]
pub enum StoreError {
    /// No credential file on disk for the provider.
    NotLoggedIn(String),
    /// On-disk record carries a different discriminator than requested.
    WrongType {
        provider: String,
        expected: &'static str,
        found: String,
    },
    Io(std::io::Error),
    Parse(String),
    /// Token refresh failure; callers surface this as an auth error.
    Refresh(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotLoggedIn(pid) => {
                write!(f, "not logged in to {pid} - run 'opencompat login {pid}' first")
            }
            StoreError::WrongType {
                provider,
                expected,
                found,
            } => write!(f, "expected {expected} credentials for {provider}, got {found}"),
            StoreError::Io(err) => write!(f, "credential file error: {err}"),
            StoreError::Parse(msg) => write!(f, "failed to parse credentials: {msg}"),
            StoreError::Refresh(msg) => write!(f, "failed to refresh token: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

#[derive(Debug, Clone)]
enum Cached {
    OAuth(OAuthCredentials),
    ApiKey(ApiKeyCredentials),
}

#[derive(serde::Deserialize)]
struct TypeTag {
    #[serde(default, rename = "type")]
    r#type: String,
}

/// Per-provider credential persistence with an in-memory cache.
///
/// Reads hand out copies; the cache is only mutated by saves, deletes, and
/// refreshes. Refreshes for one provider are serialized behind a dedicated
/// async mutex so concurrent expired readers collapse into one token call.
pub struct CredentialStore {
    data_dir: PathBuf,
    cache: RwLock<HashMap<String, Cached>>,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    http: wreq::Client,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::with_data_dir(paths::data_dir())
    }

    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            cache: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            http: wreq::Client::new(),
        }
    }

    fn credentials_path(&self, provider_id: &str) -> PathBuf {
        self.data_dir.join(format!("{provider_id}.json"))
    }

    /// Cheap file-existence check; does not validate the record.
    pub fn is_logged_in(&self, provider_id: &str) -> bool {
        self.credentials_path(provider_id).exists()
    }

    pub fn get_oauth(&self, provider_id: &str) -> Result<OAuthCredentials, StoreError> {
        if let Some(cached) = self.cache_hit(provider_id, |entry| match entry {
            Cached::OAuth(creds) => Some(creds.clone()),
            Cached::ApiKey(_) => None,
        }) {
            return Ok(cached);
        }

        let raw = self.read_record(provider_id, "oauth")?;
        let creds: OAuthCredentials =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Parse(err.to_string()))?;
        Ok(self.populate_oauth(provider_id, creds))
    }

    pub fn get_api_key(&self, provider_id: &str) -> Result<ApiKeyCredentials, StoreError> {
        if let Some(cached) = self.cache_hit(provider_id, |entry| match entry {
            Cached::ApiKey(creds) => Some(creds.clone()),
            Cached::OAuth(_) => None,
        }) {
            return Ok(cached);
        }

        let raw = self.read_record(provider_id, "api_key")?;
        let creds: ApiKeyCredentials =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Parse(err.to_string()))?;

        let mut cache = self.cache.write().expect("credential cache poisoned");
        if let Some(Cached::ApiKey(existing)) = cache.get(provider_id) {
            return Ok(existing.clone());
        }
        cache.insert(provider_id.to_string(), Cached::ApiKey(creds.clone()));
        Ok(creds)
    }

    pub fn save_oauth(
        &self,
        provider_id: &str,
        creds: &OAuthCredentials,
    ) -> Result<(), StoreError> {
        let mut record = creds.clone();
        record.r#type = "oauth".to_string();
        let data =
            serde_json::to_vec_pretty(&record).map_err(|err| StoreError::Parse(err.to_string()))?;
        self.write_record(provider_id, &data)?;
        self.cache
            .write()
            .expect("credential cache poisoned")
            .insert(provider_id.to_string(), Cached::OAuth(record));
        Ok(())
    }

    pub fn save_api_key(
        &self,
        provider_id: &str,
        creds: &ApiKeyCredentials,
    ) -> Result<(), StoreError> {
        let mut record = creds.clone();
        record.r#type = "api_key".to_string();
        let data =
            serde_json::to_vec_pretty(&record).map_err(|err| StoreError::Parse(err.to_string()))?;
        self.write_record(provider_id, &data)?;
        self.cache
            .write()
            .expect("credential cache poisoned")
            .insert(provider_id.to_string(), Cached::ApiKey(record));
        Ok(())
    }

    pub fn delete(&self, provider_id: &str) -> Result<(), StoreError> {
        self.cache
            .write()
            .expect("credential cache poisoned")
            .remove(provider_id);
        match std::fs::remove_file(self.credentials_path(provider_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Save tokens from a token-endpoint response, deriving `account_id` and
    /// `email` through the provider's extractors (id_token first, then
    /// access_token; extractor failures leave the field empty).
    pub fn set_oauth_from_token_data(
        &self,
        provider_id: &str,
        tokens: &TokenData,
        oauth_cfg: &OAuthConfig,
    ) -> Result<(), StoreError> {
        let expires_at = OffsetDateTime::now_utc().unix_timestamp() + tokens.expires_in;
        let mut creds = OAuthCredentials {
            r#type: "oauth".to_string(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            id_token: tokens.id_token.clone(),
            expires_at,
            account_id: String::new(),
            email: String::new(),
        };

        if let Some(extract) = oauth_cfg.extract_account_id {
            if !tokens.id_token.is_empty() {
                creds.account_id = extract(&tokens.id_token).unwrap_or_default();
            }
            if creds.account_id.is_empty() {
                creds.account_id = extract(&tokens.access_token).unwrap_or_default();
            }
        }
        if let Some(extract) = oauth_cfg.extract_email {
            if !tokens.id_token.is_empty() {
                creds.email = extract(&tokens.id_token).unwrap_or_default();
            }
            if creds.email.is_empty() {
                creds.email = extract(&tokens.access_token).unwrap_or_default();
            }
        }

        self.save_oauth(provider_id, &creds)
    }

    /// One refresh round-trip against the provider's token endpoint.
    pub async fn refresh_oauth(
        &self,
        provider_id: &str,
        oauth_cfg: &OAuthConfig,
    ) -> Result<(), StoreError> {
        let creds = self.get_oauth(provider_id)?;
        if creds.refresh_token.is_empty() {
            return Err(StoreError::Refresh("no refresh token available".to_string()));
        }

        let body = form_encode(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &creds.refresh_token),
            ("client_id", &oauth_cfg.client_id),
        ]);

        let resp = self
            .http
            .post(&oauth_cfg.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| StoreError::Refresh(err.to_string()))?;

        let status = resp.status().as_u16();
        let raw = resp
            .bytes()
            .await
            .map_err(|err| StoreError::Refresh(err.to_string()))?;

        if !(200..300).contains(&status) {
            if let Ok(oauth_err) = serde_json::from_slice::<OAuthErrorBody>(&raw) {
                if !oauth_err.error.is_empty() {
                    return Err(StoreError::Refresh(format!(
                        "token refresh failed: {} - {}",
                        oauth_err.error, oauth_err.error_description
                    )));
                }
            }
            return Err(StoreError::Refresh(format!(
                "token refresh failed with status {status}"
            )));
        }

        let mut tokens: TokenData =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Refresh(err.to_string()))?;

        // Endpoints may rotate the refresh token; retain the prior one otherwise.
        if tokens.refresh_token.is_empty() {
            tokens.refresh_token = creds.refresh_token;
        }

        self.set_oauth_from_token_data(provider_id, &tokens, oauth_cfg)
    }

    /// Load credentials, refreshing them first when expired.
    ///
    /// Expiry is re-checked after taking the per-provider lock so that N
    /// concurrent expired readers produce at most one token-endpoint call.
    pub async fn get_oauth_refreshed(
        &self,
        provider_id: &str,
        oauth_cfg: &OAuthConfig,
    ) -> Result<OAuthCredentials, StoreError> {
        let creds = self.get_oauth(provider_id)?;
        if !creds.is_expired() {
            return Ok(creds);
        }

        let lock = self.refresh_lock(provider_id);
        let _guard = lock.lock().await;

        let creds = self.get_oauth(provider_id)?;
        if !creds.is_expired() {
            return Ok(creds);
        }

        debug!(provider = provider_id, "refreshing expired oauth token");
        self.refresh_oauth(provider_id, oauth_cfg).await?;
        self.get_oauth(provider_id)
    }

    fn refresh_lock(&self, provider_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        locks
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn cache_hit<T>(&self, provider_id: &str, pick: impl Fn(&Cached) -> Option<T>) -> Option<T> {
        {
            let cache = self.cache.read().expect("credential cache poisoned");
            match cache.get(provider_id) {
                None => return None,
                Some(entry) => {
                    if let Some(found) = pick(entry) {
                        return Some(found);
                    }
                }
            }
        }

        // Wrong variant cached: evict under the write lock, re-checking in
        // case another task replaced it first.
        let mut cache = self.cache.write().expect("credential cache poisoned");
        if let Some(entry) = cache.get(provider_id) {
            if let Some(found) = pick(entry) {
                return Some(found);
            }
            cache.remove(provider_id);
        }
        None
    }

    fn read_record(&self, provider_id: &str, expected: &'static str) -> Result<Vec<u8>, StoreError> {
        let path = self.credentials_path(provider_id);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotLoggedIn(provider_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let tag: TypeTag =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Parse(err.to_string()))?;
        if tag.r#type != expected {
            return Err(StoreError::WrongType {
                provider: provider_id.to_string(),
                expected,
                found: tag.r#type,
            });
        }
        Ok(raw)
    }

    fn populate_oauth(&self, provider_id: &str, creds: OAuthCredentials) -> OAuthCredentials {
        let mut cache = self.cache.write().expect("credential cache poisoned");
        if let Some(Cached::OAuth(existing)) = cache.get(provider_id) {
            return existing.clone();
        }
        cache.insert(provider_id.to_string(), Cached::OAuth(creds.clone()));
        creds
    }

    fn write_record(&self, provider_id: &str, data: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.data_dir)?;
        set_mode(&self.data_dir, 0o700)?;

        // File-replace write keeps readers from ever seeing partial JSON.
        let path = self.credentials_path(provider_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        set_mode(&tmp, 0o600)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn form_encode(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        percent_encode_into(&mut out, value);
    }
    out
}

fn percent_encode_into(out: &mut String, value: &str) {
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> CredentialStore {
        let dir = std::env::temp_dir().join(format!("opencompat-store-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        CredentialStore::with_data_dir(dir)
    }

    fn sample_oauth() -> OAuthCredentials {
        OAuthCredentials {
            r#type: String::new(),
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            id_token: "idt".to_string(),
            expires_at: OffsetDateTime::now_utc().unix_timestamp() + 3600,
            account_id: "acct".to_string(),
            email: "user@example.com".to_string(),
        }
    }

    #[test]
    fn oauth_round_trip_returns_copies() {
        let store = temp_store("roundtrip");
        let creds = sample_oauth();
        store.save_oauth("chatgpt", &creds).expect("save");

        let mut loaded = store.get_oauth("chatgpt").expect("load");
        assert_eq!(loaded.access_token, creds.access_token);
        assert_eq!(loaded.r#type, "oauth");

        // Mutating the returned copy must not leak into the cache.
        loaded.access_token = "mutated".to_string();
        let reloaded = store.get_oauth("chatgpt").expect("reload");
        assert_eq!(reloaded.access_token, "at");
    }

    #[test]
    fn missing_record_is_not_logged_in() {
        let store = temp_store("missing");
        match store.get_oauth("chatgpt") {
            Err(StoreError::NotLoggedIn(pid)) => assert_eq!(pid, "chatgpt"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!store.is_logged_in("chatgpt"));
    }

    #[test]
    fn wrong_discriminator_is_rejected() {
        let store = temp_store("wrongtype");
        store
            .save_api_key(
                "acme",
                &ApiKeyCredentials {
                    r#type: String::new(),
                    api_key: "sk-1".to_string(),
                    created_at: 0,
                },
            )
            .expect("save");

        match store.get_oauth("acme") {
            Err(StoreError::WrongType { expected, found, .. }) => {
                assert_eq!(expected, "oauth");
                assert_eq!(found, "api_key");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        // The api_key view still works after the failed oauth read.
        let key = store.get_api_key("acme").expect("api key");
        assert_eq!(key.api_key, "sk-1");
    }

    #[test]
    fn delete_clears_cache_and_disk() {
        let store = temp_store("delete");
        store.save_oauth("chatgpt", &sample_oauth()).expect("save");
        assert!(store.is_logged_in("chatgpt"));
        store.delete("chatgpt").expect("delete");
        assert!(!store.is_logged_in("chatgpt"));
        assert!(matches!(
            store.get_oauth("chatgpt"),
            Err(StoreError::NotLoggedIn(_))
        ));
        // Deleting again is a no-op.
        store.delete("chatgpt").expect("repeat delete");
    }

    #[test]
    fn form_encoding_escapes_reserved_bytes() {
        assert_eq!(
            form_encode(&[("a", "x y"), ("b", "c&d=e")]),
            "a=x%20y&b=c%26d%3De"
        );
    }
}
