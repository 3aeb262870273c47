//! System tools: `system.execute` (local trust tier), `system.env`,
//! `system.datetime`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::params::{opt_str, opt_u64, require_str};
use crate::safety::{CommandPolicy, EnvPolicy};
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};
use fabric_kernel::manifest::TrustTier;

pub struct ExecuteTool {
    descriptor: ToolDescriptor,
    policy: CommandPolicy,
}

impl ExecuteTool {
    pub fn new(policy: CommandPolicy) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("system.execute", "Execute a shell command")
                .with_capability(
                    "exec",
                    "exec",
                    "Run a shell command with a timeout; dangerous patterns are refused",
                    json!({
                        "type": "object",
                        "properties": {
                            "command": { "type": "string" },
                            "working_dir": { "type": "string" },
                            "timeout": { "type": "integer", "description": "milliseconds" }
                        },
                        "required": ["command"]
                    }),
                )
                .with_trust_tier(TrustTier::Local),
            policy,
        }
    }
}

#[async_trait]
impl FabricTool for ExecuteTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let command = require_str(&params, "command")?;
        let timeout_ms = opt_u64(&params, "timeout", 30_000);
        self.policy.check(command)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = opt_str(&params, "working_dir") {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::new("EXEC_ERROR", e.to_string()))?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let waited = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            let mut out = String::new();
            let mut err = String::new();
            if let Some(stdout) = stdout.as_mut() {
                let _ = stdout.read_to_string(&mut out).await;
            }
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut err).await;
            }
            let status = child.wait().await;
            (out, err, status)
        })
        .await;

        match waited {
            Ok((out, err, status)) => {
                let status = status.map_err(|e| ToolError::new("EXEC_ERROR", e.to_string()))?;
                Ok(json!({
                    "stdout": out,
                    "stderr": err,
                    "exit_code": status.code(),
                    "command": command,
                }))
            }
            Err(_) => Err(ToolError::new(
                "TIMEOUT",
                format!("Command timed out after {timeout_ms}ms"),
            )),
        }
    }
}

pub struct EnvTool {
    descriptor: ToolDescriptor,
    policy: EnvPolicy,
}

impl EnvTool {
    pub fn new(policy: EnvPolicy) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("system.env", "Read environment variables")
                .with_capability(
                    "get",
                    "get",
                    "Get one variable, or all non-sensitive variables",
                    json!({
                        "type": "object",
                        "properties": { "name": { "type": "string" } }
                    }),
                ),
            policy,
        }
    }
}

#[async_trait]
impl FabricTool for EnvTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        match opt_str(&params, "name") {
            Some(name) => {
                let value = std::env::var(name).ok();
                let exists = value.is_some();
                Ok(json!({
                    "name": name,
                    "value": value,
                    "exists": exists,
                }))
            }
            None => {
                let variables: serde_json::Map<String, serde_json::Value> = std::env::vars()
                    .filter(|(name, _)| !self.policy.is_sensitive(name))
                    .map(|(name, value)| (name, json!(value)))
                    .collect();
                let count = variables.len();
                Ok(json!({ "variables": variables, "count": count }))
            }
        }
    }
}

pub struct DateTimeTool {
    descriptor: ToolDescriptor,
}

impl DateTimeTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("system.datetime", "Current date and time")
                .with_capability(
                    "now",
                    "now",
                    "Current UTC time in iso, rfc2822, or custom strftime format",
                    json!({
                        "type": "object",
                        "properties": {
                            "format": { "type": "string" },
                            "custom_format": { "type": "string" }
                        }
                    }),
                ),
        }
    }
}

impl Default for DateTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for DateTimeTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let now = Utc::now();
        let format = opt_str(&params, "format").unwrap_or("iso");

        let formatted = match format {
            "rfc2822" => now.to_rfc2822(),
            "custom" => match opt_str(&params, "custom_format") {
                Some(custom) => now.format(custom).to_string(),
                None => now.to_rfc3339(),
            },
            _ => now.to_rfc3339(),
        };

        Ok(json!({
            "iso": now.to_rfc3339(),
            "timestamp": now.timestamp(),
            "timezone": "UTC",
            "formatted": formatted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_captures_output_and_exit_code() {
        let tool = ExecuteTool::new(CommandPolicy::defaults());
        let out = tool
            .execute("exec", json!({ "command": "echo hello && exit 3" }))
            .await
            .unwrap();
        assert!(out["stdout"].as_str().unwrap().contains("hello"));
        assert_eq!(out["exit_code"], 3);
    }

    #[tokio::test]
    async fn dangerous_commands_are_refused() {
        let tool = ExecuteTool::new(CommandPolicy::defaults());
        let err = tool
            .execute("exec", json!({ "command": "sudo rm -rf /" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, "DANGEROUS_COMMAND");
    }

    #[tokio::test]
    async fn exec_honors_timeout() {
        let tool = ExecuteTool::new(CommandPolicy::defaults());
        let err = tool
            .execute("exec", json!({ "command": "sleep 5", "timeout": 100 }))
            .await
            .unwrap_err();
        assert_eq!(err.code, "TIMEOUT");
    }

    #[tokio::test]
    async fn env_single_variable() {
        std::env::set_var("FABRIC_TEST_VALUE", "42");
        let tool = EnvTool::new(EnvPolicy::defaults());
        let out = tool
            .execute("get", json!({ "name": "FABRIC_TEST_VALUE" }))
            .await
            .unwrap();
        assert_eq!(out["value"], "42");
        assert_eq!(out["exists"], true);
    }

    #[tokio::test]
    async fn env_listing_filters_sensitive() {
        std::env::set_var("FABRIC_TEST_SECRET", "hunter2");
        std::env::set_var("FABRIC_TEST_PLAIN", "ok");
        let tool = EnvTool::new(EnvPolicy::defaults());
        let out = tool.execute("get", json!({})).await.unwrap();
        let variables = out["variables"].as_object().unwrap();
        assert!(!variables.contains_key("FABRIC_TEST_SECRET"));
        assert!(variables.contains_key("FABRIC_TEST_PLAIN"));
    }

    #[tokio::test]
    async fn datetime_formats() {
        let tool = DateTimeTool::new();
        let out = tool.execute("now", json!({})).await.unwrap();
        assert!(out["iso"].as_str().unwrap().contains('T'));
        assert!(out["timestamp"].as_i64().unwrap() > 1_700_000_000);

        let out = tool
            .execute("now", json!({ "format": "rfc2822" }))
            .await
            .unwrap();
        assert!(out["formatted"].as_str().unwrap().contains("GMT")
            || out["formatted"].as_str().unwrap().contains("+0000"));
    }
}
