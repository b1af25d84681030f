//! Configuration file management for atc24.
//!
//! Reads/writes `~/.atc24/config.yaml` with the feed endpoint, query API
//! bind address, and default log level.

use std::path::{Path, PathBuf};

use crate::types::AtcError;

/// Public ATC 24 event stream.
pub const DEFAULT_FEED_URL: &str = "wss://24data.ptfs.app/wss";

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub feed: FeedConfig,
    pub dashboard: DashboardConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig {
                url: DEFAULT_FEED_URL.into(),
            },
            dashboard: DashboardConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            log_level: "info".into(),
        }
    }
}

/// Get the config directory path (`~/.atc24/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".atc24")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.atc24/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(_) => Config::default(),
    }
}

/// Save config to `~/.atc24/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, AtcError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), AtcError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| AtcError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| AtcError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys are ignored.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
            } else {
                current_section = None;
                if key == "log_level" {
                    if let Some(v) = parse_string_value(val) {
                        config.log_level = v;
                    }
                }
            }
            continue;
        }

        match (current_section.as_deref(), key) {
            (Some("feed"), "url") => {
                if let Some(v) = parse_string_value(val) {
                    config.feed.url = v;
                }
            }
            (Some("dashboard"), "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.dashboard.host = v;
                }
            }
            (Some("dashboard"), "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.dashboard.port = v;
                }
            }
            _ => {}
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let lines = [
        "# atc24 configuration".to_string(),
        String::new(),
        "feed:".into(),
        format!("  url: \"{}\"", config.feed.url),
        String::new(),
        "dashboard:".into(),
        format!("  host: \"{}\"", config.dashboard.host),
        format!("  port: {}", config.dashboard.port),
        String::new(),
        format!("log_level: \"{}\"", config.log_level),
    ];
    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed.url, DEFAULT_FEED_URL);
        assert_eq!(config.dashboard.port, 8080);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
feed:
  url: "ws://localhost:9000/wss"

dashboard:
  host: "0.0.0.0"
  port: 9090

log_level: debug
"#;
        let config = parse_config(text);
        assert_eq!(config.feed.url, "ws://localhost:9000/wss");
        assert_eq!(config.dashboard.host, "0.0.0.0");
        assert_eq!(config.dashboard.port, 9090);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_parse_config_bad_values_keep_defaults() {
        let text = r#"
feed:
  url: ~
dashboard:
  port: not-a-port
"#;
        let config = parse_config(text);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.yaml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = Config {
            feed: FeedConfig {
                url: "ws://example.test/feed".into(),
            },
            dashboard: DashboardConfig {
                host: "0.0.0.0".into(),
                port: 8181,
            },
            log_level: "warn".into(),
        };
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path), config);
    }

    #[test]
    fn test_save_into_file_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let err = save_config_to(&Config::default(), &blocker.join("config.yaml")).unwrap_err();
        assert!(matches!(err, AtcError::Config(_)), "got {err:?}");
    }
}
