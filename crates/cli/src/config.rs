//! Host-level configuration, read from `~/.cosmo/config.toml` if present
//! (`spec.md` §2.3).

use std::path::PathBuf;

use serde::Deserialize;

/// Knobs that affect the host program only, never language semantics.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persist REPL input across sessions.
    pub history: bool,
    /// Where REPL history is written, relative to `$HOME` if not absolute.
    pub history_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Config { history: true, history_file: ".cosmo/history".to_string() }
    }
}

impl Config {
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("failed to parse config: {e}"))
    }

    /// Load `~/.cosmo/config.toml`, falling back to defaults if absent or
    /// unreadable.
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Config::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => match Self::from_toml(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("warning: {}: {e}", path.display());
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        let raw = PathBuf::from(&self.history_file);
        if raw.is_absolute() {
            return Some(raw);
        }
        home::home_dir().map(|home| home.join(raw))
    }
}

fn config_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".cosmo").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = Config::from_toml("").unwrap();
        assert!(config.history);
        assert_eq!(config.history_file, ".cosmo/history");
    }

    #[test]
    fn overrides_from_toml() {
        let config = Config::from_toml("history = false\nhistory_file = \"/tmp/h\"\n").unwrap();
        assert!(!config.history);
        assert_eq!(config.history_file, "/tmp/h");
    }
}
