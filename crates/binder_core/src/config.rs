use std::fs;

use serde::Deserialize;

/// Which controllers emit debug output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DebugFilter {
    #[default]
    Off,
    All,
    Tags(Vec<String>),
}

impl DebugFilter {
    /// `true`/`1` enables every tag, a comma separated list enables those tags.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "" | "false" | "0" | "off" => DebugFilter::Off,
            "true" | "1" | "on" | "all" => DebugFilter::All,
            _ => DebugFilter::Tags(
                raw.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    pub fn enabled_for(&self, tag: &str) -> bool {
        match self {
            DebugFilter::Off => false,
            DebugFilter::All => true,
            DebugFilter::Tags(tags) => tags.iter().any(|t| t == tag),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinderConfig {
    pub debug: DebugFilter,
    /// Base for relative frame addresses, e.g. `https://example.org`.
    pub origin: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            debug: DebugFilter::Off,
            origin: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    debug: Option<String>,
    origin: Option<String>,
    request_timeout_secs: Option<u64>,
}

pub fn load_config() -> BinderConfig {
    let mut config = BinderConfig::default();

    if let Ok(raw) = fs::read_to_string("binder.toml") {
        apply_file_config(&mut config, &raw);
    }

    if let Ok(v) = std::env::var("BINDER_DEBUG") {
        config.debug = DebugFilter::parse(&v);
    }

    if let Ok(v) = std::env::var("BINDER_ORIGIN") {
        config.origin = Some(v);
    }
    if let Ok(v) = std::env::var("APP__ORIGIN") {
        config.origin = Some(v);
    }

    if let Ok(v) = std::env::var("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            config.request_timeout_secs = parsed;
        }
    }

    config
}

fn apply_file_config(config: &mut BinderConfig, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<FileConfig>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.debug {
        config.debug = DebugFilter::parse(&v);
    }
    if let Some(v) = file_cfg.origin {
        config.origin = Some(v);
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        config.request_timeout_secs = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_filter_accepts_tag_lists() {
        let filter = DebugFilter::parse("todo-list, dynamic-frame");
        assert!(filter.enabled_for("dynamic-frame"));
        assert!(!filter.enabled_for("other"));
        assert!(DebugFilter::parse("true").enabled_for("anything"));
        assert!(!DebugFilter::parse("").enabled_for("anything"));
    }

    #[test]
    fn file_config_overrides_defaults() {
        let mut config = BinderConfig::default();
        apply_file_config(
            &mut config,
            "origin = \"http://localhost:8080\"\nrequest_timeout_secs = 5\ndebug = \"all\"\n",
        );
        assert_eq!(config.origin.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.debug, DebugFilter::All);
    }

    #[test]
    fn malformed_file_config_is_ignored() {
        let mut config = BinderConfig::default();
        apply_file_config(&mut config, "origin = [");
        assert!(config.origin.is_none());
        assert_eq!(config.request_timeout_secs, 30);
    }
}
