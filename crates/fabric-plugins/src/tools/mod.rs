//! Built-in tool set.
//!
//! Tool ids and capability names mirror the wire surface: `io.read_file`
//! (read), `web.http_request` (request), `math.calculate` (eval), and so
//! on. [`builtin_tool_host`] assembles the full set with the configured
//! safety policies; the manifest document can disable individual tools.

use crate::FabricTool;

pub mod data;
pub mod docs;
pub mod encode;
pub mod io;
pub mod math;
pub mod security;
pub mod system;
pub mod text;
pub mod web;

pub use data::{CsvTool, JsonTool, ValidateTool};
pub use docs::MarkdownTool;
pub use encode::UrlEncodeTool;
pub use io::{ListDirectoryTool, ReadFileTool, SearchFilesTool, WriteFileTool};
pub use math::{CalculateTool, StatisticsTool};
pub use security::{Base64Tool, HashTool};
pub use system::{DateTimeTool, EnvTool, ExecuteTool};
pub use text::{DiffTool, RegexTool, TransformTool};
pub use web::{BraveSearchTool, FetchPageTool, HttpRequestTool, ParseUrlTool};

use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::safety::{CommandPolicy, EnvPolicy, PathPolicy};
use crate::ToolHost;

/// Configuration shared by the built-in tools.
#[derive(Clone)]
pub struct BuiltinToolsConfig {
    pub path_policy: PathPolicy,
    pub command_policy: CommandPolicy,
    pub env_policy: EnvPolicy,
    /// API key for `web.brave_search`; the tool reports `NO_API_KEY`
    /// without one.
    pub brave_api_key: Option<String>,
    /// Tool ids disabled by the manifest document.
    pub disabled: HashSet<String>,
}

impl Default for BuiltinToolsConfig {
    fn default() -> Self {
        Self {
            path_policy: PathPolicy::defaults(),
            command_policy: CommandPolicy::defaults(),
            env_policy: EnvPolicy::defaults(),
            brave_api_key: None,
            disabled: HashSet::new(),
        }
    }
}

/// Build a [`ToolHost`] with every enabled built-in tool registered.
pub fn builtin_tool_host(config: BuiltinToolsConfig) -> ToolHost {
    let client = reqwest::Client::new();
    let path_policy = Arc::new(config.path_policy);

    let mut host = ToolHost::new();
    macro_rules! register {
        ($tool:expr) => {{
            let tool = $tool;
            if !config.disabled.contains(&tool.descriptor().tool_id) {
                host.register(tool);
            }
        }};
    }

    register!(ReadFileTool::new(path_policy.clone()));
    register!(WriteFileTool::new(path_policy.clone()));
    register!(ListDirectoryTool::new(path_policy.clone()));
    register!(SearchFilesTool::new(path_policy.clone()));

    register!(HttpRequestTool::new(client.clone()));
    register!(FetchPageTool::new(client.clone()));
    register!(ParseUrlTool::new());
    register!(BraveSearchTool::new(client, config.brave_api_key.clone()));

    register!(CalculateTool::new());
    register!(StatisticsTool::new());

    register!(RegexTool::new());
    register!(TransformTool::new());
    register!(DiffTool::new());

    register!(ExecuteTool::new(config.command_policy.clone()));
    register!(EnvTool::new(config.env_policy.clone()));
    register!(DateTimeTool::new());

    register!(JsonTool::new());
    register!(CsvTool::new());
    register!(ValidateTool::new());

    register!(HashTool::new());
    register!(Base64Tool::new());

    register!(UrlEncodeTool::new());
    register!(MarkdownTool::new());

    info!(count = host.count(), "built-in tools registered");
    host
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_host_registers_every_builtin() {
        let host = builtin_tool_host(BuiltinToolsConfig::default());
        let ids = host.tool_ids();
        for expected in [
            "io.read_file",
            "io.write_file",
            "io.list_directory",
            "io.search_files",
            "web.http_request",
            "web.fetch_page",
            "web.parse_url",
            "web.brave_search",
            "math.calculate",
            "math.statistics",
            "text.regex",
            "text.transform",
            "text.diff",
            "system.execute",
            "system.env",
            "system.datetime",
            "data.json",
            "data.csv",
            "data.validate",
            "security.hash",
            "security.base64",
            "encode.url",
            "docs.markdown",
        ] {
            assert!(ids.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn disabled_tools_are_skipped() {
        let mut config = BuiltinToolsConfig::default();
        config.disabled.insert("system.execute".to_string());
        let host = builtin_tool_host(config);
        assert!(host.describe_tool("system.execute").is_none());
        assert!(host.describe_tool("system.env").is_some());
    }

    #[tokio::test]
    async fn every_listed_tool_describes() {
        let host = builtin_tool_host(BuiltinToolsConfig::default());
        for descriptor in host.list_tools(None, None) {
            let described = host.describe_tool(&descriptor.tool_id).unwrap();
            assert!(!described.capabilities.is_empty());
        }
    }
}
