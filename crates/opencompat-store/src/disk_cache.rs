use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Sidecar metadata stored next to each cached file as `<name>.meta.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMeta {
    #[serde(default)]
    pub version: String,
    /// Unix seconds of the last successful upstream fetch.
    #[serde(default)]
    pub fetched_at: i64,
}

impl CacheMeta {
    pub fn now(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            fetched_at: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    pub fn age_secs(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp() - self.fetched_at
    }

    pub fn is_stale(&self, ttl_secs: i64) -> bool {
        self.age_secs() > ttl_secs
    }
}

/// Write `<dir>/<name>` plus its metadata sidecar.
pub fn save(dir: &Path, name: &str, content: &[u8], meta: &CacheMeta) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(name), content)?;
    let meta_json = serde_json::to_vec(meta)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    std::fs::write(dir.join(format!("{name}.meta.json")), meta_json)
}

/// Read `<dir>/<name>` and its sidecar. Both files must exist.
pub fn load(dir: &Path, name: &str) -> std::io::Result<(Vec<u8>, CacheMeta)> {
    let meta_raw = std::fs::read(dir.join(format!("{name}.meta.json")))?;
    let meta: CacheMeta = serde_json::from_slice(&meta_raw)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let content = std::fs::read(dir.join(name))?;
    Ok((content, meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("opencompat-cache-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let meta = CacheMeta::now("v1.2.3");
        save(&dir, "prompt.md", b"be helpful", &meta).expect("save");
        let (content, loaded) = load(&dir, "prompt.md").expect("load");
        assert_eq!(content, b"be helpful");
        assert_eq!(loaded.version, "v1.2.3");
        assert!(!loaded.is_stale(60));
    }

    #[test]
    fn missing_sidecar_is_an_error() {
        let dir = std::env::temp_dir().join(format!("opencompat-cache-miss-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("orphan"), b"x").expect("write");
        assert!(load(&dir, "orphan").is_err());
    }

    #[test]
    fn staleness_by_ttl() {
        let meta = CacheMeta {
            version: String::new(),
            fetched_at: OffsetDateTime::now_utc().unix_timestamp() - 100,
        };
        assert!(meta.is_stale(50));
        assert!(!meta.is_stale(200));
    }
}
