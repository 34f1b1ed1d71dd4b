use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 8787;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// JSON document with persisted drive records.
    #[serde(default)]
    pub storage_config_path: Option<PathBuf>,
    /// Bearer token accepted by the storage config write endpoint. Writes
    /// are refused when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Native bindings: binding name → bucket directory.
    #[serde(default)]
    pub bindings: BTreeMap<String, PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Single `BUCKET` binding under `data_dir`, no persisted drives.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert("BUCKET".to_string(), data_dir.join("bucket"));
        Self {
            listen_port: DEFAULT_PORT,
            storage_config_path: Some(data_dir.join("storage.json")),
            admin_token: None,
            bindings,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.listen_port == 0 {
            anyhow::bail!("listen_port must not be 0");
        }
        for (name, dir) in &self.bindings {
            if name.trim().is_empty() {
                anyhow::bail!("binding names must not be empty");
            }
            if !dir.is_absolute() {
                anyhow::bail!("binding '{}' directory must be absolute: {}", name, dir.display());
            }
        }
        if let Some(p) = &self.storage_config_path {
            if !p.is_absolute() {
                anyhow::bail!("storage_config_path must be absolute: {}", p.display());
            }
        }
        if matches!(self.admin_token.as_deref(), Some(t) if t.trim().is_empty()) {
            anyhow::bail!("admin_token must not be blank");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let toml_str = r#"
listen_port = 9000
storage_config_path = "/var/lib/multidrive/storage.json"

[bindings]
BUCKET = "/var/lib/multidrive/bucket"
photos = "/srv/photos"
"#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.bindings.len(), 2);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen_port, DEFAULT_PORT);
        assert!(config.bindings.is_empty());

        let data = ServerConfig::with_data_dir(Path::new("/data"));
        assert_eq!(data.bindings["BUCKET"], PathBuf::from("/data/bucket"));
    }

    #[test]
    fn test_relative_binding_rejected() {
        let toml_str = r#"
[bindings]
BUCKET = "relative/bucket"
"#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_admin_token_rejected() {
        let config: ServerConfig = toml::from_str(r#"admin_token = " ""#).unwrap();
        assert!(config.validate().is_err());
    }
}
