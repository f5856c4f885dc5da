//! Config file parsing for `~/.config/epubkit/config.toml`.
//!
//! Use `parse_options_from_config` to turn the loaded config into
//! [`ParseOptions`] so the configured limits apply.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::reader::ParseOptions;
use crate::security::SecurityLimits;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

/// Overrides for [`SecurityLimits`]; unset values keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Total decompressed size of the container.
    pub max_file_size_mb: Option<u64>,
    pub max_resource_size_mb: Option<u64>,
    pub max_compression_ratio: Option<u64>,
    pub max_file_count: Option<u64>,
    pub max_nesting_depth: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_true")]
    pub extract_cover: bool,
    #[serde(default = "default_true")]
    pub parse_toc: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            extract_cover: true,
            parse_toc: true,
        }
    }
}

/// Load config from the default path (`~/.config/epubkit/config.toml`).
pub fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => AppConfig::default(),
    }
}

/// Load config from `path`. Missing or invalid files yield the defaults.
pub fn load_config_from(path: &Path) -> AppConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return AppConfig::default(),
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("epubkit");
        p.push("config.toml");
        p
    })
}

/// Build security limits from config. Uses defaults for any unset values.
pub fn security_limits_from_config(c: &SecurityConfig) -> SecurityLimits {
    let mut limits = SecurityLimits::default();
    if let Some(mb) = c.max_file_size_mb {
        limits.max_total_size_bytes = mb.saturating_mul(MB);
    }
    if let Some(mb) = c.max_resource_size_mb {
        limits.max_resource_size_bytes = mb.saturating_mul(MB);
    }
    if let Some(r) = c.max_compression_ratio {
        limits.max_compression_ratio = r;
    }
    if let Some(n) = c.max_file_count {
        limits.max_file_count = n;
    }
    if let Some(d) = c.max_nesting_depth {
        limits.max_nesting_depth = d;
    }
    limits
}

pub fn parse_options_from_config(cfg: &AppConfig) -> ParseOptions {
    ParseOptions {
        security: security_limits_from_config(&cfg.security),
        extract_cover: cfg.reader.extract_cover,
        parse_toc: cfg.reader.parse_toc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
[security]
max_file_size_mb = 50
max_nesting_depth = 64

[reader]
extract_cover = false
"#,
        )
        .unwrap();
        let options = parse_options_from_config(&cfg);
        assert_eq!(options.security.max_total_size_bytes, 50 * MB);
        assert_eq!(options.security.max_nesting_depth, 64);
        assert_eq!(
            options.security.max_compression_ratio,
            SecurityLimits::default().max_compression_ratio
        );
        assert!(!options.extract_cover);
        assert!(options.parse_toc);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[security]\nmax_file_count = 12\n").unwrap();
        let cfg = load_config_from(&path);
        assert_eq!(cfg.security.max_file_count, Some(12));
        assert_eq!(cfg.reader, ReaderConfig::default());
    }

    #[test]
    fn test_missing_or_invalid_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config_from(&dir.path().join("absent.toml")), AppConfig::default());

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[security\nmax_file_count = ").unwrap();
        assert_eq!(load_config_from(&path), AppConfig::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let cfg = AppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert_eq!(toml::from_str::<AppConfig>(&text).unwrap(), cfg);
    }
}
