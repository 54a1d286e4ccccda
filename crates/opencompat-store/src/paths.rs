use std::path::PathBuf;

pub const APP_NAME: &str = "opencompat";

/// XDG data directory for credentials and markers.
/// `$XDG_DATA_HOME/opencompat`, falling back to `~/.local/share/opencompat`.
pub fn data_dir() -> PathBuf {
    match std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        Some(base) => PathBuf::from(base).join(APP_NAME),
        None => home_dir().join(".local").join("share").join(APP_NAME),
    }
}

/// XDG cache directory for prompt and model caches.
/// `$XDG_CACHE_HOME/opencompat`, falling back to `~/.cache/opencompat`.
pub fn cache_dir() -> PathBuf {
    match std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        Some(base) => PathBuf::from(base).join(APP_NAME),
        None => home_dir().join(".cache").join(APP_NAME),
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = data_dir();
    create_private_dir(&dir)?;
    Ok(dir)
}

pub fn ensure_cache_dir() -> std::io::Result<PathBuf> {
    let dir = cache_dir();
    create_private_dir(&dir)?;
    Ok(dir)
}

fn create_private_dir(dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, Permissions::from_mode(0o700))?;
    }
    Ok(())
}

pub fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

pub fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

pub fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
