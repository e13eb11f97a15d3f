//! Picker configuration, loaded once at startup and passed by reference into
//! the components that need it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::actor::package_watch::ACTION_WALLPAPER_SERVICE;
use crate::actor::surface_host::DEFAULT_PLACEHOLDER_COLOR;
use crate::sys::geometry::Point;
use crate::sys::surface::Color;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Placeholder fill as `#rrggbb` or `#aarrggbb`.
    pub placeholder_color: String,
    pub rtl: bool,
    /// Set false to force the static fallback even where the platform
    /// supports mirrored live preview.
    pub live_preview: bool,
    pub log_filter: String,
    pub service_action: String,
    pub live_package: String,
    pub screen_width: i32,
    pub screen_height: i32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            placeholder_color: "#1a1a1a".to_string(),
            rtl: false,
            live_preview: true,
            log_filter: "info".to_string(),
            service_action: ACTION_WALLPAPER_SERVICE.to_string(),
            live_package: "org.papermirror.sample".to_string(),
            screen_width: 1080,
            screen_height: 2400,
        }
    }
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("papermirror").join("config.toml"))
    }

    /// Loads from `path`, or from the user config dir when present, or falls
    /// back to defaults. An explicit path that fails to read or parse is an
    /// error; a missing default file is not.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Config::config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Config::default()),
            },
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn placeholder_color(&self) -> Color {
        Color::from_hex(&self.placeholder_color).unwrap_or_else(|| {
            warn!("invalid placeholder_color {:?}; using default", self.placeholder_color);
            DEFAULT_PLACEHOLDER_COLOR
        })
    }

    pub fn screen_size(&self) -> Point { Point::new(self.screen_width, self.screen_height) }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.placeholder_color(), DEFAULT_PLACEHOLDER_COLOR);
        assert_eq!(config.screen_size(), Point::new(1080, 2400));
        assert!(config.live_preview);
    }

    #[test]
    fn loads_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "placeholder_color = \"#203040\"\nrtl = true\nlive_package = \"org.example.wp\"\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.placeholder_color(), Color::rgb(0x20, 0x30, 0x40));
        assert!(config.rtl);
        assert_eq!(config.live_package, "org.example.wp");
        // untouched fields keep their defaults
        assert_eq!(config.screen_width, 1080);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "no_such_key = 1\n").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/papermirror.toml"))).is_err());
    }

    #[test]
    fn bad_color_falls_back_to_default() {
        let config = Config {
            placeholder_color: "teal".to_string(),
            ..Config::default()
        };
        assert_eq!(config.placeholder_color(), DEFAULT_PLACEHOLDER_COLOR);
    }
}
