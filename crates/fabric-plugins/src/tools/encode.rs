//! Encoding tools: `encode.url`.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;

use crate::params::{opt_bool, require_str};
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};

pub struct UrlEncodeTool {
    descriptor: ToolDescriptor,
}

impl UrlEncodeTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("encode.url", "URL percent-encoding")
                .with_capability(
                    "encode",
                    "url_encode",
                    "Percent-encode text, or decode with decode=true",
                    json!({
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "decode": { "type": "boolean" }
                        },
                        "required": ["text"]
                    }),
                ),
        }
    }
}

impl Default for UrlEncodeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for UrlEncodeTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let text = require_str(&params, "text")?;
        let decode = opt_bool(&params, "decode", false);

        let result = if decode {
            percent_decode_str(text)
                .decode_utf8()
                .map_err(|e| ToolError::new("URL_ENCODE_ERROR", e.to_string()))?
                .to_string()
        } else {
            utf8_percent_encode(text, NON_ALPHANUMERIC).to_string()
        };

        let result_length = result.len();
        Ok(json!({
            "result": result,
            "operation": if decode { "decode" } else { "encode" },
            "original_length": text.len(),
            "result_length": result_length,
        }))
    }
}
