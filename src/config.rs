use std::time::Duration;

use crate::engine::VmConfig;

/// Default timeout for tool operations (30 seconds).
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Default timeout for upstream HTTP requests (30 seconds).
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tool_timeout: Duration,
    pub upstream_url: Option<String>,
    pub upstream_timeout: Duration,
    /// Sizing used when `initialize_vm` and local program runs omit it.
    pub default_vm: VmConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            upstream_url: None,
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            default_vm: VmConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment.
    ///
    /// - `VM_BRIDGE_TOOL_TIMEOUT_SECS` (optional, default 30): max seconds per tool call
    /// - `VM_BRIDGE_UPSTREAM_URL` (optional): backend that program runs are delegated to
    /// - `VM_BRIDGE_UPSTREAM_TIMEOUT_SECS` (optional, default 30)
    /// - `VM_BRIDGE_HISTORY_LIMIT` (optional, default 10000): records kept per VM session
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(secs) = parse_positive(&lookup, "VM_BRIDGE_TOOL_TIMEOUT_SECS")? {
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(&lookup, "VM_BRIDGE_UPSTREAM_TIMEOUT_SECS")? {
            config.upstream_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_positive(&lookup, "VM_BRIDGE_HISTORY_LIMIT")? {
            config.default_vm.history_limit = usize::try_from(limit)
                .map_err(|_| "VM_BRIDGE_HISTORY_LIMIT is too large".to_string())?;
        }

        config.upstream_url = lookup("VM_BRIDGE_UPSTREAM_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &config.upstream_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!(
                    "VM_BRIDGE_UPSTREAM_URL must be an http(s) URL, got '{url}'"
                ));
            }
        }

        Ok(config)
    }
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, String> {
    match lookup(key) {
        Some(val) => match val.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(format!("{key} must be a positive integer")),
        },
        None => Ok(None),
    }
}
