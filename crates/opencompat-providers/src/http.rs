use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use opencompat_provider_core::{ProviderError, ProviderResult};

/// Deadline for chat calls; generations can run for minutes.
const CHAT_TIMEOUT: Duration = Duration::from_secs(300);
/// Deadline for token exchanges, model lists, and prompt fetches.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SharedClientKind {
    /// Long-deadline client for streaming chat calls.
    Chat,
    /// Short-deadline client for everything else.
    Control,
}

static CLIENT_CACHE: OnceLock<Mutex<HashMap<SharedClientKind, wreq::Client>>> = OnceLock::new();

pub(crate) fn shared_client(kind: SharedClientKind) -> ProviderResult<wreq::Client> {
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| ProviderError::Invalid("http client cache lock failed".to_string()))?;

    if let Some(client) = guard.get(&kind) {
        return Ok(client.clone());
    }

    let timeout = match kind {
        SharedClientKind::Chat => CHAT_TIMEOUT,
        SharedClientKind::Control => CONTROL_TIMEOUT,
    };
    let client = wreq::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(|err| ProviderError::Transport(err.to_string()))?;
    guard.insert(kind, client.clone());
    Ok(client)
}

/// `{product}/{version} ({OS} {version}; {arch}) {terminal}`, matching the
/// official client pattern upstream expects.
pub fn build_user_agent(product: &str, version: &str) -> String {
    format!(
        "{product}/{version} ({}; {}) {}",
        os_info(),
        architecture(),
        terminal_info()
    )
}

fn os_info() -> String {
    let name = match std::env::consts::OS {
        "macos" => "Mac OS X",
        "linux" => "Linux",
        "windows" => "Windows",
        other => other,
    };
    format!("{name} {}", os_version())
}

fn os_version() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
            let release = release.trim();
            if !release.is_empty() {
                return sanitize_header_value(release);
            }
        }
    }
    "unknown".to_string()
}

fn architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x86_64",
        "aarch64" => "arm64",
        other => other,
    }
}

fn terminal_info() -> String {
    let program = std::env::var("TERM_PROGRAM").unwrap_or_default();
    let version = std::env::var("TERM_PROGRAM_VERSION").unwrap_or_default();
    let term = std::env::var("TERM").unwrap_or_default();

    let result = if !program.is_empty() {
        if !version.is_empty() {
            format!("{program}/{version}")
        } else {
            program
        }
    } else if !term.is_empty() {
        term
    } else {
        "unknown".to_string()
    };
    sanitize_header_value(&result)
}

/// Replace bytes that are not valid in a header token with underscores.
pub fn sanitize_header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '/' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_has_expected_shape() {
        let ua = build_user_agent("codex_cli_rs", "0.77.0");
        assert!(ua.starts_with("codex_cli_rs/0.77.0 ("));
        assert!(ua.contains("; "));
        assert!(!ua.ends_with(')'), "terminal segment follows parens: {ua}");
    }

    #[test]
    fn sanitize_replaces_invalid_bytes() {
        assert_eq!(sanitize_header_value("xterm 256(color)"), "xterm_256_color_");
        assert_eq!(sanitize_header_value("iTerm.app/3.5"), "iTerm.app/3.5");
    }
}
