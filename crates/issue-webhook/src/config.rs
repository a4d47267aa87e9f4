//! Configuration for the webhook service.
//!
//! Read once at startup from the environment (optionally seeded from a
//! `.env` file) and shared read-only across requests.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Label that requests a discussion reply.
pub const DEFAULT_DISCUSS_LABEL: &str = "claude-discuss";

/// Label that requests an implementation pull request.
pub const DEFAULT_IMPLEMENT_LABEL: &str = "claude-implement";

/// Footer appended to every comment the service posts.
///
/// Also used to recognize the service's own replies.
pub const REPLY_SIGNATURE: &str =
    "\n\n---\n*🔧 This reply was generated automatically by [Claude Code](https://claude.ai/code)*";

/// Webhook service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Shared secret for `X-Hub-Signature-256` verification.
    pub webhook_secret: String,
    /// Bounded wait for the AI CLI.
    pub claude_timeout: Duration,
    /// Bounded wait for `gh` and `git` invocations.
    pub command_timeout: Duration,
    /// Directory holding per-issue checkouts.
    pub workdir: PathBuf,
    /// AI CLI executable.
    pub claude_bin: String,
    /// GitHub CLI executable.
    pub gh_bin: String,
    /// Git executable.
    pub git_bin: String,
    /// Label that triggers the discuss workflow.
    pub discuss_label: String,
    /// Label that triggers the implement workflow.
    pub implement_label: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("webhook_secret", &"<redacted>")
            .field("claude_timeout", &self.claude_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("workdir", &self.workdir)
            .field("claude_bin", &self.claude_bin)
            .field("gh_bin", &self.gh_bin)
            .field("git_bin", &self.git_bin)
            .field("discuss_label", &self.discuss_label)
            .field("implement_label", &self.implement_label)
            .finish()
    }
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let webhook_secret =
            get("GITHUB_WEBHOOK_SECRET").ok_or(ConfigError::Missing("GITHUB_WEBHOOK_SECRET"))?;

        let port = parse_or("PORT", get("PORT"), 8080)?;
        let claude_timeout = Duration::from_secs(parse_or("CLAUDE_TIMEOUT", get("CLAUDE_TIMEOUT"), 600)?);
        let command_timeout =
            Duration::from_secs(parse_or("COMMAND_TIMEOUT", get("COMMAND_TIMEOUT"), 120)?);

        let workdir = get("WORKDIR").map_or_else(
            || {
                get("HOME")
                    .map_or_else(|| PathBuf::from("."), PathBuf::from)
                    .join("workdir")
            },
            PathBuf::from,
        );

        Ok(Self {
            port,
            webhook_secret,
            claude_timeout,
            command_timeout,
            workdir,
            claude_bin: get("CLAUDE_BIN").unwrap_or_else(|| "claude".to_string()),
            gh_bin: get("GH_BIN").unwrap_or_else(|| "gh".to_string()),
            git_bin: get("GIT_BIN").unwrap_or_else(|| "git".to_string()),
            discuss_label: get("DISCUSS_LABEL").unwrap_or_else(|| DEFAULT_DISCUSS_LABEL.to_string()),
            implement_label: get("IMPLEMENT_LABEL")
                .unwrap_or_else(|| DEFAULT_IMPLEMENT_LABEL.to_string()),
        })
    }

    /// Minimal configuration for tests and embedding.
    #[must_use]
    pub fn with_secret(secret: &str) -> Self {
        Self {
            port: 8080,
            webhook_secret: secret.to_string(),
            claude_timeout: Duration::from_secs(600),
            command_timeout: Duration::from_secs(120),
            workdir: PathBuf::from("workdir"),
            claude_bin: "claude".to_string(),
            gh_bin: "gh".to_string(),
            git_bin: "git".to_string(),
            discuss_label: DEFAULT_DISCUSS_LABEL.to_string(),
            implement_label: DEFAULT_IMPLEMENT_LABEL.to_string(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
