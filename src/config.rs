//! Optional config file with defaults for the output flags.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::output::ColorMode;

/// Contents of `~/.config/ktail/config.toml`. Command-line flags override every field.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub quiet: bool,
    pub no_color: bool,
    pub raw: bool,
    pub timestamps: bool,
    pub color_mode: Option<ColorMode>,
    pub template: Option<String>,
    pub kubeconfig: Option<PathBuf>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("ktail").join("config.toml"))
    }

    /// Load `explicit` if given (it must exist), else the default path if present
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let Some(path) = Self::default_path() else {
            return Ok(Self::default());
        };
        match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content)
                .with_context(|| format!("Invalid config file {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read config file {}", path.display()))
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = FileConfig::from_toml(
            r#"
            quiet = true
            timestamps = true
            color_mode = "always"
            template = "{pod} {message}"
            kubeconfig = "/etc/kube/config"
            "#,
        )
        .unwrap();

        assert!(config.quiet);
        assert!(config.timestamps);
        assert!(!config.raw);
        assert_eq!(config.color_mode, Some(ColorMode::Always));
        assert_eq!(config.template.as_deref(), Some("{pod} {message}"));
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/etc/kube/config")));
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(FileConfig::from_toml("").unwrap(), FileConfig::default());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(FileConfig::from_toml("colour = true").is_err());
        assert!(FileConfig::from_toml("color_mode = \"sometimes\"").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = FileConfig::load(Some(Path::new("/nonexistent/ktail/config.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/ktail/config.toml"));
    }
}
