//! On-disk configuration.
//!
//! Optional TOML file at `<config dir>/dropgate/config.toml` (or
//! wherever `--config` points) supplying defaults for the flags people
//! get tired of typing:
//!
//! ```toml
//! listen = "0.0.0.0:7350"
//! output_dir = "/home/me/Downloads"
//! chunk_size = 65536
//! ```

use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::Deserialize;

/// Defaults merged under the command-line flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Default listen address for `--listen`-less listening modes.
    pub listen: Option<String>,
    /// Default output directory for received files.
    pub output_dir: Option<PathBuf>,
    /// Default chunk size in bytes.
    pub chunk_size: Option<usize>,
}

impl Config {
    /// Load the configuration: an explicit `--config` path must exist;
    /// the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(eyre!("config file {} does not exist", path.display()));
            }
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text)
            .wrap_err_with(|| format!("parsing config file {}", path.display()))
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dropgate").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            listen = "0.0.0.0:7350"
            output_dir = "/tmp/incoming"
            chunk_size = 32768
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.as_deref(), Some("0.0.0.0:7350"));
        assert_eq!(config.output_dir.as_deref(), Some(Path::new("/tmp/incoming")));
        assert_eq!(config.chunk_size, Some(32768));
    }

    #[test]
    fn test_empty_config_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.listen.is_none());
        assert!(config.output_dir.is_none());
        assert!(config.chunk_size.is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("window_sizee = 3").is_err());
    }

    #[test]
    fn test_missing_explicit_path_errors() {
        let err = Config::load(Some(Path::new("/nonexistent/dropgate.toml")));
        assert!(err.is_err());
    }
}
