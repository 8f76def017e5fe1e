//! Configuration loading: YAML file + CLI flags + environment fallback.

pub mod settings;

pub use settings::ProxyConfig;

use crate::error::{Error, Result};
use std::path::Path;

/// Load configuration from a YAML file, falling back to defaults for any
/// field the file omits (`serde_yaml` deserializes into `ProxyConfig`
/// directly; callers typically start from `ProxyConfig::default()` and
/// layer CLI overrides on top, matching this crate's CLI module).
pub fn load_from_file(path: impl AsRef<Path>) -> Result<ProxyConfig> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.as_ref().display())))?;
    serde_yaml::from_str(&contents)
        .map_err(|e| Error::Config(format!("parsing {}: {e}", path.as_ref().display())))
}
