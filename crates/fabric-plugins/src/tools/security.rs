//! Security tools: `security.hash`, `security.base64`.

use async_trait::async_trait;
use base64::Engine as _;
use md5::Md5;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};

use crate::params::{opt_bool, opt_str, require_str};
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};

pub struct HashTool {
    descriptor: ToolDescriptor,
}

impl HashTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("security.hash", "Cryptographic hashing")
                .with_capability(
                    "hash",
                    "hash",
                    "Hash data with md5, sha256, or sha512",
                    json!({
                        "type": "object",
                        "properties": {
                            "data": { "type": "string" },
                            "algorithm": { "type": "string", "enum": ["md5", "sha256", "sha512"] }
                        },
                        "required": ["data"]
                    }),
                ),
        }
    }
}

impl Default for HashTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for HashTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let data = require_str(&params, "data")?;
        let algorithm = opt_str(&params, "algorithm").unwrap_or("sha256");

        let (digest, bytes) = match algorithm {
            "md5" => {
                let mut hasher = Md5::new();
                hasher.update(data.as_bytes());
                (hex::encode(hasher.finalize()), 16)
            }
            "sha256" => {
                let mut hasher = Sha256::new();
                hasher.update(data.as_bytes());
                (hex::encode(hasher.finalize()), 32)
            }
            "sha512" => {
                let mut hasher = Sha512::new();
                hasher.update(data.as_bytes());
                (hex::encode(hasher.finalize()), 64)
            }
            other => {
                return Err(ToolError::new(
                    "INVALID_ALGORITHM",
                    format!("Unsupported algorithm '{other}'; supported: md5, sha256, sha512"),
                ))
            }
        };

        Ok(json!({
            "hash": digest,
            "algorithm": algorithm,
            "bytes": bytes,
        }))
    }
}

pub struct Base64Tool {
    descriptor: ToolDescriptor,
}

impl Base64Tool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("security.base64", "Base64 encode/decode")
                .with_capability(
                    "encode",
                    "base64_encode",
                    "Encode data as base64, or decode with decode=true",
                    json!({
                        "type": "object",
                        "properties": {
                            "data": { "type": "string" },
                            "decode": { "type": "boolean" }
                        },
                        "required": ["data"]
                    }),
                ),
        }
    }
}

impl Default for Base64Tool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for Base64Tool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let data = require_str(&params, "data")?;
        let decode = opt_bool(&params, "decode", false);
        let engine = base64::engine::general_purpose::STANDARD;

        let result = if decode {
            let bytes = engine
                .decode(data)
                .map_err(|e| ToolError::new("BASE64_ERROR", e.to_string()))?;
            String::from_utf8(bytes)
                .map_err(|e| ToolError::new("BASE64_ERROR", e.to_string()))?
        } else {
            engine.encode(data.as_bytes())
        };

        Ok(json!({
            "result": result,
            "operation": if decode { "decode" } else { "encode" },
        }))
    }
}
