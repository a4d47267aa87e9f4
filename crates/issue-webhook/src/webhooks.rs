//! GitHub webhook payload parsing, signature verification and classification.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{Config, REPLY_SIGNATURE};
use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Header carrying the event kind (`issues`, `issue_comment`, ...).
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Header carrying the unique delivery ID.
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the `X-Hub-Signature-256` header value for a body.
#[must_use]
pub fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a GitHub webhook signature using HMAC-SHA256.
///
/// # Arguments
/// * `body` - Raw webhook body bytes
/// * `signature` - `X-Hub-Signature-256` header value, if present
/// * `secret` - Webhook signing secret
pub fn verify_signature(
    body: &[u8],
    signature: Option<&str>,
    secret: &str,
) -> Result<(), SignatureError> {
    let signature = signature.ok_or(SignatureError::Missing)?;
    let hex_digest = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::Malformed)?;
    let Ok(signature_bytes) = hex::decode(hex_digest) else {
        return Err(SignatureError::Malformed);
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Err(SignatureError::Mismatch);
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    // Constant-time comparison to prevent timing attacks
    if bool::from(computed.as_slice().ct_eq(&signature_bytes)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Kind of webhook delivery, from the `X-GitHub-Event` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Issue opened, labeled, edited, ...
    Issues,
    /// Comment created/edited on an issue
    IssueComment,
    /// Liveness probe sent when the hook is created
    Ping,
    /// Anything else
    Other(String),
}

impl EventKind {
    /// Parse the header value; absent headers map to `Other("unknown")`.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("issues") => Self::Issues,
            Some("issue_comment") => Self::IssueComment,
            Some("ping") => Self::Ping,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other("unknown".to_string()),
        }
    }

    /// Header name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Issues => "issues",
            Self::IssueComment => "issue_comment",
            Self::Ping => "ping",
            Self::Other(name) => name,
        }
    }
}

/// Issue or issue comment event payload (the fields we use).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueEvent {
    /// Action type (labeled, created, ...)
    pub action: String,
    /// Issue the event refers to
    pub issue: Issue,
    /// Label just added (`labeled` actions)
    #[serde(default)]
    pub label: Option<Label>,
    /// Comment just created (`issue_comment` events)
    #[serde(default)]
    pub comment: Option<Comment>,
    /// Repository info
    pub repository: Repository,
    /// User who triggered the event
    #[serde(default)]
    pub sender: Option<User>,
}

/// GitHub issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number
    pub number: u64,
    /// Issue title
    #[serde(default)]
    pub title: String,
    /// Issue body
    #[serde(default)]
    pub body: Option<String>,
    /// Labels currently on the issue
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Issue HTML URL
    #[serde(default)]
    pub html_url: Option<String>,
}

/// GitHub label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
}

/// Issue comment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Comment body
    #[serde(default)]
    pub body: String,
    /// Comment author
    #[serde(default)]
    pub user: Option<User>,
}

/// GitHub user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// User login
    pub login: String,
}

/// GitHub repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Full name (owner/repo)
    pub full_name: String,
    /// Short name
    #[serde(default)]
    pub name: Option<String>,
    /// HTTPS clone URL
    #[serde(default)]
    pub clone_url: Option<String>,
    /// SSH clone URL
    #[serde(default)]
    pub ssh_url: Option<String>,
    /// Default branch
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl Repository {
    /// Short repository name, derived from `full_name` when absent.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| {
            self.full_name
                .rsplit('/')
                .next()
                .unwrap_or(self.full_name.as_str())
        })
    }

    /// Default branch, `main` when the payload omits it.
    #[must_use]
    pub fn default_branch(&self) -> &str {
        self.default_branch.as_deref().unwrap_or("main")
    }

    /// URL to clone from: SSH when available, else HTTPS, else derived.
    #[must_use]
    pub fn clone_source(&self) -> String {
        self.ssh_url
            .clone()
            .or_else(|| self.clone_url.clone())
            .unwrap_or_else(|| format!("https://github.com/{}.git", self.full_name))
    }
}

impl IssueEvent {
    /// Parse and validate a raw webhook body.
    pub fn parse(body: &[u8]) -> Result<Self, String> {
        let payload: serde_json::Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        Self::from_value(payload)
    }

    /// Validate an already decoded payload.
    pub fn from_value(payload: serde_json::Value) -> Result<Self, String> {
        let event: Self = serde_json::from_value(payload).map_err(|e| e.to_string())?;
        if event.repository.full_name.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(format!(
                "repository.full_name {:?} is not owner/repo",
                event.repository.full_name
            ));
        }
        Ok(event)
    }

    /// Labels added by this event.
    ///
    /// GitHub sends the single added label as `label`; when it is missing the
    /// issue's label set is used instead.
    #[must_use]
    pub fn added_labels(&self) -> Vec<&str> {
        match &self.label {
            Some(label) => vec![label.name.as_str()],
            None => self.issue.labels.iter().map(|l| l.name.as_str()).collect(),
        }
    }

    /// Whether the issue currently carries the named label.
    #[must_use]
    pub fn issue_has_label(&self, name: &str) -> bool {
        self.issue.labels.iter().any(|l| l.name == name)
    }
}

/// Workflow selected for a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Reply on the issue with an analysis
    Discuss,
    /// Open a pull request implementing the issue
    Implement,
    /// Nothing to do
    Ignore(String),
}

/// Decide which workflow, if any, a delivery triggers.
#[must_use]
pub fn classify(kind: &EventKind, event: &IssueEvent, config: &Config) -> Dispatch {
    match (kind, event.action.as_str()) {
        (EventKind::Issues, "labeled") => {
            let added = event.added_labels();
            // Implement is checked first and wins over discuss
            if added.contains(&config.implement_label.as_str()) {
                Dispatch::Implement
            } else if added.contains(&config.discuss_label.as_str()) {
                Dispatch::Discuss
            } else {
                Dispatch::Ignore(format!("label ignored: {}", added.join(",")))
            }
        }
        (EventKind::IssueComment, "created") => {
            if !event.issue_has_label(&config.discuss_label) {
                return Dispatch::Ignore(format!(
                    "issue #{} not marked for {}",
                    event.issue.number, config.discuss_label
                ));
            }
            if is_bot_comment(event) {
                return Dispatch::Ignore("comment posted by a bot".to_string());
            }
            Dispatch::Discuss
        }
        (kind, action) => Dispatch::Ignore(format!("event ignored: {}.{action}", kind.as_str())),
    }
}

fn is_bot_comment(event: &IssueEvent) -> bool {
    let Some(comment) = &event.comment else {
        return false;
    };
    if comment.body.trim_end().ends_with(REPLY_SIGNATURE.trim_end()) {
        return true;
    }
    comment
        .user
        .as_ref()
        .or(event.sender.as_ref())
        .is_some_and(|u| u.login.ends_with("[bot]"))
}
