//! Declarative manifest-document loading.
//!
//! The gateway bootstraps its registry from a manifest document listing
//! agents (and optionally tools). YAML and TOML are supported, detected
//! from the file extension. The loader is permissive: unknown fields are
//! preserved on the manifests, and missing optional fields take defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{FabricError, FabricResult};
use crate::manifest::AgentManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            Some("toml") => Some(Self::Toml),
            _ => None,
        }
    }
}

/// Tool entry in a manifest document. Tool implementations are discovered
/// in-process; the document can only enable/disable and configure them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfigEntry {
    pub tool_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

/// The root of a manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestDocument {
    #[serde(default)]
    pub agents: Vec<AgentManifest>,
    #[serde(default)]
    pub tools: Vec<ToolConfigEntry>,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ManifestDocument {
    pub fn from_str(content: &str, format: ConfigFormat) -> FabricResult<Self> {
        let doc: ManifestDocument = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| FabricError::bad_input(format!("invalid YAML manifest: {e}")))?,
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| FabricError::bad_input(format!("invalid TOML manifest: {e}")))?,
        };
        for agent in &doc.agents {
            agent.validate()?;
        }
        Ok(doc)
    }

    pub fn from_yaml(content: &str) -> FabricResult<Self> {
        Self::from_str(content, ConfigFormat::Yaml)
    }

    /// Load a manifest document from disk, detecting the format from the
    /// file extension.
    pub fn load_file(path: impl AsRef<Path>) -> FabricResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            FabricError::bad_input(format!(
                "unable to determine manifest format from extension: {}",
                path.display()
            ))
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            FabricError::bad_input(format!("failed to read manifest '{}': {e}", path.display()))
        })?;
        Self::from_str(&content, format)
    }
}
