// This module handles config.toml.
// Every field has a default, so running without a config file is fine; the
// result is a plain value that gets handed to whoever needs it.
//
// Precedence, highest first: command-line flags, $COMFYUI_URL, the file, defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8188";
pub const ENDPOINT_ENV: &str = "COMFYUI_URL";

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the ComfyUI server; /prompt is appended.
    pub endpoint: String,
    /// Check references and acyclicity before sending. With this off, the server
    /// is trusted to reject broken graphs.
    pub validate_graph: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Unset means wait as long as the server takes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            validate_graph: true,
            client_id: None,
            timeout_secs: None,
        }
    }
}

/// Model files the card workflow loads. These are names relative to ComfyUI's
/// own models/ directories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub unet_name: String,
    pub clip_name1: String,
    pub clip_name2: String,
    pub clip_type: String,
    pub vae_name: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            unet_name: "flux1-schnell.safetensors".to_string(),
            clip_name1: "t5xxl_fp16.safetensors".to_string(),
            clip_name2: "clip_l.safetensors".to_string(),
            clip_type: "flux".to_string(),
            vae_name: "ae.safetensors".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Error reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Error parsing {}", path.display()))
    }

    /// Reads the file if one was given, then applies the environment override.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::var(ENDPOINT_ENV).ok());
        Ok(config)
    }

    fn apply_env(&mut self, endpoint: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            self.backend.endpoint = endpoint;
        }
    }
}

#[cfg(test)]
pub fn testconfig() -> Config {
    toml::from_str(include_str!("../testdata/config.toml")).unwrap()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_serialization() {
        let config = Config {
            backend: BackendConfig {
                endpoint: "http://gpu-box:8188".to_string(),
                validate_graph: false,
                client_id: Some("card-dreamer".to_string()),
                timeout_secs: Some(600),
            },
            model: ModelConfig {
                unet_name: "1".to_string(),
                clip_name1: "2".to_string(),
                clip_name2: "3".to_string(),
                clip_type: "4".to_string(),
                vae_name: "5".to_string(),
            },
        };
        let text = toml::to_string(&config).unwrap();
        let config2 = toml::from_str(&text).unwrap();
        assert_eq!(config, config2);
    }

    #[test]
    fn test_testconfig() {
        let config = testconfig();
        assert_eq!(config.backend.endpoint, DEFAULT_ENDPOINT);
        assert!(config.backend.validate_graph);
        assert_eq!(config.backend.client_id, None);
        assert_eq!(config.model, ModelConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[backend]\nendpoint = \"http://10.0.0.2:8188\"\n").unwrap();
        assert_eq!(config.backend.endpoint, "http://10.0.0.2:8188");
        assert!(config.backend.validate_graph);
        assert_eq!(config.backend.timeout_secs, None);
        assert_eq!(config.model, ModelConfig::default());

        let empty: Config = toml::from_str("").unwrap();
        assert_eq!(empty, Config::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\ntimeout_secs = 30\n\n[model]\nvae_name = \"other.safetensors\"").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.backend.timeout_secs, Some(30));
        assert_eq!(config.backend.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.model.vae_name, "other.safetensors");
    }

    #[test]
    fn test_from_file_errors() {
        assert!(Config::from_file("/nonexistent/config.toml").is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nendpoint = 8188").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Error parsing"));
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        config.apply_env(Some("   ".to_string()));
        assert_eq!(config.backend.endpoint, DEFAULT_ENDPOINT);
        config.apply_env(Some("http://remote:8188".to_string()));
        assert_eq!(config.backend.endpoint, "http://remote:8188");
        config.apply_env(None);
        assert_eq!(config.backend.endpoint, "http://remote:8188");
    }
}
