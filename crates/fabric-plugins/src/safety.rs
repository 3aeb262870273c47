//! Per-tool safety policies.
//!
//! File tools get path restrictions, the command tool gets a
//! dangerous-pattern denylist, and the environment tool gets a
//! sensitive-variable filter. Policies are constructor-injected so
//! deployments can tighten or relax them without touching tool code.

use std::path::{Path, PathBuf};

use crate::ToolError;

/// Path allow/deny policy for `io.*` tools.
///
/// Paths are resolved before checking so `..` segments cannot escape the
/// allowed roots. An empty allow list denies everything.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    allow_roots: Vec<PathBuf>,
    deny_prefixes: Vec<PathBuf>,
}

const DEFAULT_DENY: &[&str] = &["/etc", "/sys", "/proc", "/dev", "/boot", "/var/run"];

impl PathPolicy {
    pub fn new(allow_roots: Vec<PathBuf>) -> Self {
        Self {
            allow_roots,
            deny_prefixes: DEFAULT_DENY.iter().map(PathBuf::from).collect(),
        }
    }

    /// Temp dir plus the working directory, matching the development
    /// defaults the gateway ships with.
    pub fn defaults() -> Self {
        let mut roots = vec![std::env::temp_dir()];
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        Self::new(roots)
    }

    pub fn with_deny_prefixes(mut self, deny: Vec<PathBuf>) -> Self {
        self.deny_prefixes = deny;
        self
    }

    /// Resolve `path` and verify it is inside an allowed root and outside
    /// every denied prefix. Returns the resolved path for the tool to use.
    pub fn check(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = resolve(Path::new(path)).ok_or_else(|| {
            ToolError::new("ACCESS_DENIED", format!("Cannot resolve path: {path}"))
        })?;

        if self
            .deny_prefixes
            .iter()
            .any(|deny| resolved.starts_with(deny))
        {
            return Err(ToolError::new(
                "ACCESS_DENIED",
                format!("Access to path not allowed: {path}"),
            ));
        }

        let allowed = self.allow_roots.iter().any(|root| {
            resolve(root)
                .map(|root| resolved.starts_with(root))
                .unwrap_or(false)
        });
        if !allowed {
            return Err(ToolError::new(
                "ACCESS_DENIED",
                format!("Access to path not allowed: {path}"),
            ));
        }
        Ok(resolved)
    }
}

/// Canonicalize a path that may not exist yet: an existing path resolves
/// directly, otherwise its parent must resolve and the file name is
/// reattached.
fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Some(resolved);
    }
    let parent = path.parent()?;
    let file_name = path.file_name()?;
    let parent = if parent.as_os_str().is_empty() {
        std::env::current_dir().ok()?
    } else {
        parent.canonicalize().ok()?
    };
    Some(parent.join(file_name))
}

/// Dangerous-pattern denylist for `system.execute`.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    deny_patterns: Vec<String>,
}

const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "rm -rf /",
    "sudo",
    "chmod 777",
    "> /dev",
    "mkfs",
    ":(){",
];

impl CommandPolicy {
    pub fn new(deny_patterns: Vec<String>) -> Self {
        Self { deny_patterns }
    }

    pub fn defaults() -> Self {
        Self::new(DEFAULT_DENY_PATTERNS.iter().map(|s| s.to_string()).collect())
    }

    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        let lowered = command.to_lowercase();
        for pattern in &self.deny_patterns {
            if lowered.contains(&pattern.to_lowercase()) {
                return Err(ToolError::new(
                    "DANGEROUS_COMMAND",
                    format!("Command contains dangerous pattern: {pattern}"),
                ));
            }
        }
        Ok(())
    }
}

/// Sensitive-variable filter for `system.env`.
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    markers: Vec<String>,
}

const DEFAULT_MARKERS: &[&str] = &["PASSWORD", "SECRET", "TOKEN", "KEY", "CREDENTIAL"];

impl EnvPolicy {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    pub fn defaults() -> Self {
        Self::new(DEFAULT_MARKERS.iter().map(|s| s.to_string()).collect())
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.markers.iter().any(|m| upper.contains(m))
    }
}
