use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

/// On-disk settings. Every field has a default so a partial (or missing)
/// file is fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory the document store serves files from.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub direction: DirectionSection,
    #[serde(default)]
    pub serialize: SerializeSection,
}

/// Right-to-left detection thresholds. The defaults are empirical; they are
/// exposed here rather than hard-coded so they can be tuned per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionSection {
    pub auto_detect: bool,
    pub default_rtl: bool,
    pub header_lines: usize,
    pub min_rtl_tokens: usize,
    pub min_density: f32,
}

impl Default for DirectionSection {
    fn default() -> Self {
        Self {
            auto_detect: true,
            default_rtl: false,
            header_lines: 5,
            min_rtl_tokens: 2,
            min_density: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeSection {
    /// Fence family for newly created diagram and formula blocks.
    pub default_fence: FencePreference,
    /// Emit explicit image tags for sized or aligned images.
    pub explicit_image_attrs: bool,
}

impl Default for SerializeSection {
    fn default() -> Self {
        Self {
            default_fence: FencePreference::Backtick,
            explicit_image_attrs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FencePreference {
    #[default]
    Backtick,
    Colon,
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let mut config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        // Expand shell variables and tilde in the configured root
        if let Some(root) = config.root.take() {
            config.root = Some(Self::expand_path(&root).unwrap_or(root));
        }

        Ok(Some(config))
    }

    pub fn load() -> Result<Option<Self>, ConfigError> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        self.save_to_path(&config_path)
    }

    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/markdown-weft");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }

    fn expand_path(path: &Path) -> Option<PathBuf> {
        let path_str = path.to_string_lossy();
        match shellexpand::full(&path_str) {
            Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_path() {
        let config_path = Config::config_path();
        let path_str = config_path.to_string_lossy();

        assert!(!path_str.starts_with('~'));
        assert!(path_str.ends_with(".config/markdown-weft/config.toml"));
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.direction.auto_detect);
        assert_eq!(config.direction.header_lines, 5);
        assert_eq!(config.serialize.default_fence, FencePreference::Backtick);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            "[direction]\nmin_density = 0.5\n\n[serialize]\ndefault_fence = \"colon\"\n",
        )
        .unwrap();

        assert_eq!(config.direction.min_density, 0.5);
        assert_eq!(config.direction.min_rtl_tokens, 2);
        assert_eq!(config.serialize.default_fence, FencePreference::Colon);
        assert!(config.serialize.explicit_image_attrs);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let original = Config {
            root: Some(PathBuf::from("/tmp/weft-notes")),
            ..Config::default()
        };

        let toml_str = toml::to_string(&original).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config {
            root: Some(PathBuf::from("/tmp/weft-notes")),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_root_tilde_is_expanded_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "root = \"~/weft-notes\"\n").unwrap();

        let loaded = Config::load_from_path(&path).unwrap().unwrap();
        let root = loaded.root.unwrap();
        assert!(!root.to_string_lossy().starts_with('~'));
        assert!(root.to_string_lossy().ends_with("weft-notes"));
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "root = [not valid").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParseError { .. }));
    }
}
