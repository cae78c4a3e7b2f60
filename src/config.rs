//! Tool server configuration and launch-spec resolution
//!
//! A [`ServerConfig`] describes how to launch one tool server. Command,
//! arguments and environment values may carry `${VAR}` placeholder tokens;
//! [`resolve_launch`] expands them against a [`CredentialSource`] once,
//! before spawn, so secrets never live in the stored config and the
//! protocol layer never sees placeholders.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // Intentional .unwrap() - the pattern is a compile-time constant
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
});

/// Configuration for one tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Human-readable name, used in logs and summaries
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Executable to spawn
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides, merged over the parent environment at spawn
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Error types for launch-spec resolution
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no credential available for placeholder '${{{name}}}'")]
    UnknownPlaceholder { name: String },
}

/// Source of values for `${VAR}` placeholders
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Credential source backed by the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A launch spec with every placeholder expanded, ready to spawn
#[derive(Debug, Clone)]
pub struct ResolvedLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Expand every `${VAR}` placeholder in a config's command, args and env
///
/// Pure with respect to the config: resolution happens once per connect
/// and the stored config keeps its placeholders.
pub fn resolve_launch(
    config: &ServerConfig,
    credentials: &dyn CredentialSource,
) -> Result<ResolvedLaunch, ConfigError> {
    let command = expand(&config.command, credentials)?;
    let args = config
        .args
        .iter()
        .map(|arg| expand(arg, credentials))
        .collect::<Result<Vec<_>, _>>()?;
    let env = config
        .env
        .iter()
        .map(|(key, value)| Ok((key.clone(), expand(value, credentials)?)))
        .collect::<Result<HashMap<_, _>, ConfigError>>()?;

    Ok(ResolvedLaunch { command, args, env })
}

fn expand(input: &str, credentials: &dyn CredentialSource) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut last_end = 0;

    for capture in PLACEHOLDER.captures_iter(input) {
        // Intentional .unwrap() - group 0 is the whole match and always present
        let token = capture.get(0).unwrap();
        let name = &capture[1];

        let value = credentials
            .lookup(name)
            .ok_or_else(|| ConfigError::UnknownPlaceholder {
                name: name.to_string(),
            })?;

        output.push_str(&input[last_end..token.start()]);
        output.push_str(&value);
        last_end = token.end();
    }
    output.push_str(&input[last_end..]);

    Ok(output)
}

// ============================================================================
// Tests
// ============================================================================
