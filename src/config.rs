use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::schema::{Settings, SiteConfig};

/// Load a site configuration from disk.
pub fn load(path: &Path) -> Result<SiteConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))
}

/// Directory the configuration lives in; relative paths resolve against it.
pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Where the state file lives for this configuration.
///
/// Honors `settings.state_file` (tilde-expanded, relative to the config
/// directory) and defaults to `terral.state.json` next to the config.
pub fn state_path(config_path: &Path, settings: &Settings) -> PathBuf {
    match &settings.state_file {
        Some(configured) => {
            let expanded = shellexpand::tilde(configured);
            let path = PathBuf::from(expanded.as_ref());
            if path.is_absolute() {
                path
            } else {
                base_dir(config_path).join(path)
            }
        }
        None => base_dir(config_path).join("terral.state.json"),
    }
}

/// Root directory of the managed site.
pub fn site_root(settings: &Settings) -> Result<PathBuf> {
    match &settings.site_root {
        Some(configured) => {
            let expanded = shellexpand::tilde(configured);
            Ok(PathBuf::from(expanded.as_ref()))
        }
        None => {
            let home = dirs::home_dir().context("Could not determine home directory")?;
            Ok(home
                .join(".local")
                .join("state")
                .join("terral")
                .join("site"))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_path_defaults_next_to_config() {
        let settings = Settings::default();
        let path = state_path(Path::new("/site/terral.toml"), &settings);
        assert_eq!(path, PathBuf::from("/site/terral.state.json"));
    }

    #[test]
    fn test_state_path_bare_config_name() {
        let settings = Settings::default();
        let path = state_path(Path::new("terral.toml"), &settings);
        assert_eq!(path, PathBuf::from("./terral.state.json"));
    }

    #[test]
    fn test_state_path_relative_override() {
        let settings = Settings {
            state_file: Some("state/prod.json".to_string()),
            ..Settings::default()
        };
        let path = state_path(Path::new("/site/terral.toml"), &settings);
        assert_eq!(path, PathBuf::from("/site/state/prod.json"));
    }

    #[test]
    fn test_state_path_absolute_override() {
        let settings = Settings {
            state_file: Some("/var/lib/terral/state.json".to_string()),
            ..Settings::default()
        };
        let path = state_path(Path::new("/site/terral.toml"), &settings);
        assert_eq!(path, PathBuf::from("/var/lib/terral/state.json"));
    }

    #[test]
    fn test_site_root_override() {
        let settings = Settings {
            site_root: Some("/srv/site".to_string()),
            ..Settings::default()
        };
        assert_eq!(site_root(&settings).unwrap(), PathBuf::from("/srv/site"));
    }

    #[test]
    fn test_load_missing_config_reports_path() {
        let err = load(Path::new("/definitely/not/there.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/there.toml"));
    }
}
