use opencompat_protocol::openai::response::Model;

/// Per-model reasoning policy and prompt file.
#[derive(Debug, Clone, Copy)]
pub struct ModelConfig {
    pub prompt_file: &'static str,
    pub supports_none: bool,
    pub supports_xhigh: bool,
    pub default_effort: &'static str,
    pub min_effort: &'static str,
}

const MODEL_CONFIGS: &[(&str, ModelConfig)] = &[
    (
        "gpt-5.2-codex",
        ModelConfig {
            prompt_file: "gpt-5.2-codex_prompt.md",
            supports_none: false,
            supports_xhigh: true,
            default_effort: "medium",
            min_effort: "low",
        },
    ),
    (
        "gpt-5.1-codex-max",
        ModelConfig {
            prompt_file: "gpt-5.1-codex-max_prompt.md",
            supports_none: false,
            supports_xhigh: true,
            default_effort: "high",
            min_effort: "low",
        },
    ),
    (
        "gpt-5.1-codex",
        ModelConfig {
            prompt_file: "gpt_5_codex_prompt.md",
            supports_none: false,
            supports_xhigh: false,
            default_effort: "medium",
            min_effort: "low",
        },
    ),
    (
        "gpt-5-codex",
        ModelConfig {
            prompt_file: "gpt_5_codex_prompt.md",
            supports_none: false,
            supports_xhigh: false,
            default_effort: "medium",
            min_effort: "low",
        },
    ),
    (
        // Only medium or high.
        "gpt-5.1-codex-mini",
        ModelConfig {
            prompt_file: "gpt_5_codex_prompt.md",
            supports_none: false,
            supports_xhigh: false,
            default_effort: "medium",
            min_effort: "medium",
        },
    ),
    (
        "gpt-5.2",
        ModelConfig {
            prompt_file: "gpt_5_2_prompt.md",
            supports_none: true,
            supports_xhigh: true,
            default_effort: "medium",
            min_effort: "none",
        },
    ),
    (
        "gpt-5.1",
        ModelConfig {
            prompt_file: "gpt_5_1_prompt.md",
            supports_none: true,
            supports_xhigh: false,
            default_effort: "medium",
            min_effort: "none",
        },
    ),
    (
        "gpt-5",
        ModelConfig {
            prompt_file: "gpt_5_1_prompt.md",
            supports_none: true,
            supports_xhigh: false,
            default_effort: "medium",
            min_effort: "none",
        },
    ),
];

/// User-friendly names to canonical model ids.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("codex", "gpt-5.1-codex"),
    ("codex-mini", "gpt-5.1-codex-mini"),
    ("codex-mini-latest", "gpt-5.1-codex-mini"),
    ("codex-max", "gpt-5.1-codex-max"),
    ("gpt-5", "gpt-5.1"),
    ("gpt-5-codex", "gpt-5.1-codex"),
    ("gpt-5-latest", "gpt-5.2"),
    ("gpt-5.2-latest", "gpt-5.2"),
    ("gpt-5.1-latest", "gpt-5.1"),
    ("gpt-5-codex-latest", "gpt-5.2-codex"),
    ("gpt-5.2-codex-latest", "gpt-5.2-codex"),
    ("gpt-5.1-codex-latest", "gpt-5.1-codex"),
    ("codex-latest", "gpt-5.2-codex"),
    ("gpt-5.1-codex-max-latest", "gpt-5.1-codex-max"),
];

const EFFORT_SUFFIXES: &[&str] = &["none", "low", "medium", "high", "xhigh"];

const EFFORT_LEVELS: &[&str] = &["none", "low", "medium", "high", "xhigh"];

pub fn model_config(model_id: &str) -> Option<&'static ModelConfig> {
    MODEL_CONFIGS
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, cfg)| cfg)
}

fn alias(model: &str) -> Option<&'static str> {
    MODEL_ALIASES
        .iter()
        .find(|(from, _)| *from == model)
        .map(|(_, to)| *to)
}

pub fn prompt_file(model_id: &str) -> &'static str {
    model_config(model_id)
        .map(|cfg| cfg.prompt_file)
        .unwrap_or("gpt_5_codex_prompt.md")
}

/// Deduplicated prompt files across all configured models.
pub fn all_prompt_files() -> Vec<&'static str> {
    let mut files = Vec::new();
    for (_, cfg) in MODEL_CONFIGS {
        if !files.contains(&cfg.prompt_file) {
            files.push(cfg.prompt_file);
        }
    }
    files
}

pub fn supported_models() -> Vec<Model> {
    MODEL_CONFIGS
        .iter()
        .map(|(id, _)| Model::new(*id, "openai"))
        .collect()
}

/// Split a trailing `-<effort>` suffix off a model name.
pub fn parse_model_with_effort(model: &str) -> (&str, &str) {
    for suffix in EFFORT_SUFFIXES {
        if let Some(base) = model.strip_suffix(suffix) {
            if let Some(base) = base.strip_suffix('-') {
                if !base.is_empty() {
                    return (base, suffix);
                }
            }
        }
    }
    (model, "")
}

/// Canonical model name plus any effort suffix, after stripping a provider
/// prefix and resolving aliases.
pub fn normalize_model_with_effort(model: &str) -> (String, String) {
    let model = match model.rfind('/') {
        Some(idx) => &model[idx + 1..],
        None => model,
    };

    let (base, effort) = parse_model_with_effort(model);

    if let Some(canonical) = alias(base) {
        return (canonical.to_string(), effort.to_string());
    }
    // Aliases that themselves end in an effort-like token.
    if let Some(canonical) = alias(model) {
        return (canonical.to_string(), String::new());
    }
    (base.to_string(), effort.to_string())
}

/// Clamp the requested effort to what the model supports.
pub fn normalize_reasoning_effort(model_id: &str, effort: &str) -> String {
    let Some(cfg) = model_config(model_id) else {
        return effort.to_string();
    };

    let Some(requested) = EFFORT_LEVELS.iter().position(|level| *level == effort) else {
        return cfg.default_effort.to_string();
    };
    let minimum = EFFORT_LEVELS
        .iter()
        .position(|level| *level == cfg.min_effort)
        .unwrap_or(0);

    let mut effort = EFFORT_LEVELS[requested.max(minimum)];
    if effort == "none" && !cfg.supports_none {
        effort = "low";
    }
    if effort == "xhigh" && !cfg.supports_xhigh {
        effort = "high";
    }
    effort.to_string()
}

pub fn is_supported(model_id: &str) -> bool {
    let (normalized, _) = normalize_model_with_effort(model_id);
    MODEL_CONFIGS.iter().any(|(id, _)| *id == normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_suffix_stripping_for_all_aliases() {
        for (name, canonical) in MODEL_ALIASES {
            for effort in EFFORT_SUFFIXES {
                let spelled = format!("{name}-{effort}");
                let (model, parsed) = normalize_model_with_effort(&spelled);
                assert_eq!(model, *canonical, "alias {spelled}");
                assert_eq!(parsed, *effort, "alias {spelled}");
            }
            let (model, parsed) = normalize_model_with_effort(name);
            assert_eq!(model, *canonical);
            assert_eq!(parsed, "");
        }
    }

    #[test]
    fn provider_prefix_is_stripped() {
        let (model, effort) = normalize_model_with_effort("chatgpt/gpt-5-high");
        assert_eq!(model, "gpt-5.1");
        assert_eq!(effort, "high");
    }

    #[test]
    fn unknown_model_passes_through() {
        let (model, effort) = normalize_model_with_effort("gpt-9-high");
        assert_eq!(model, "gpt-9");
        assert_eq!(effort, "high");
        assert!(!is_supported("gpt-9"));
    }

    #[test]
    fn effort_clamped_to_minimum() {
        // codex-mini only allows medium or high.
        assert_eq!(normalize_reasoning_effort("gpt-5.1-codex-mini", "low"), "medium");
        assert_eq!(normalize_reasoning_effort("gpt-5.1-codex-mini", "high"), "high");
    }

    #[test]
    fn effort_replaced_by_support_flags() {
        // No "none" on codex models.
        assert_eq!(normalize_reasoning_effort("gpt-5.1-codex", "none"), "low");
        // No "xhigh" on gpt-5.1.
        assert_eq!(normalize_reasoning_effort("gpt-5.1", "xhigh"), "high");
        // gpt-5.2 supports both ends.
        assert_eq!(normalize_reasoning_effort("gpt-5.2", "none"), "none");
        assert_eq!(normalize_reasoning_effort("gpt-5.2", "xhigh"), "xhigh");
    }

    #[test]
    fn invalid_effort_falls_back_to_default() {
        assert_eq!(normalize_reasoning_effort("gpt-5.1", "turbo"), "medium");
        assert_eq!(normalize_reasoning_effort("gpt-5.1-codex-max", "turbo"), "high");
    }

    #[test]
    fn prompt_files_deduplicated() {
        let files = all_prompt_files();
        assert!(files.contains(&"gpt_5_codex_prompt.md"));
        let unique: std::collections::BTreeSet<_> = files.iter().collect();
        assert_eq!(unique.len(), files.len());
    }
}
