//! GitHub access through the `gh` CLI.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ToolError;
use crate::runner::{CommandRunner, CommandSpec};

/// Fields requested from `gh issue view --json`.
const ISSUE_VIEW_FIELDS: &str = "title,body,author,labels,state,comments";

/// GitHub client for interacting with GitHub via the `gh` CLI
#[derive(Clone)]
pub struct GitHubCli {
    runner: Arc<dyn CommandRunner>,
    gh_bin: String,
    timeout: Duration,
}

/// Issue details as returned by `gh issue view --json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueDetails {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub labels: Vec<IssueLabel>,
    #[serde(default)]
    pub comments: Vec<IssueComment>,
}

/// Comment or issue author
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub login: String,
}

/// Label entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueLabel {
    pub name: String,
}

/// A comment in the issue conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueComment {
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub body: String,
}

impl IssueDetails {
    /// Body of the most recent comment, if any.
    #[must_use]
    pub fn last_comment_body(&self) -> Option<&str> {
        self.comments.last().map(|c| c.body.as_str())
    }
}

impl GitHubCli {
    /// Create a client that runs `gh_bin` through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, gh_bin: &str, timeout: Duration) -> Self {
        Self {
            runner,
            gh_bin: gh_bin.to_string(),
            timeout,
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.gh_bin, self.timeout).args(args)
    }

    /// Fetch an issue with its conversation.
    ///
    /// # Errors
    /// Returns an error if the `gh` CLI command fails or prints invalid JSON.
    pub async fn view_issue(&self, repo: &str, number: u64) -> Result<IssueDetails, ToolError> {
        let number = number.to_string();
        let spec = self.command([
            "issue",
            "view",
            number.as_str(),
            "--repo",
            repo,
            "--json",
            ISSUE_VIEW_FIELDS,
        ]);
        let output = self.runner.run(&spec).await?;

        let details: IssueDetails =
            serde_json::from_str(&output.stdout).map_err(|e| ToolError::InvalidOutput {
                program: self.gh_bin.clone(),
                reason: format!("issue view JSON: {e}"),
            })?;

        debug!(
            repo = %repo,
            issue = %number,
            title = %details.title,
            comments = details.comments.len(),
            "Fetched issue"
        );
        Ok(details)
    }

    /// Add a comment to an issue
    ///
    /// The body goes through stdin (`--body-file -`) so long replies are not
    /// limited by argument size.
    ///
    /// # Errors
    /// Returns an error if the `gh` CLI command fails.
    pub async fn comment_on_issue(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ToolError> {
        let number = number.to_string();
        let spec = self
            .command([
                "issue",
                "comment",
                number.as_str(),
                "--repo",
                repo,
                "--body-file",
                "-",
            ])
            .stdin(body);
        self.runner.run(&spec).await?;

        info!(repo = %repo, issue = %number, "Posted issue comment");
        Ok(())
    }

    /// Open a pull request from `head` into `base` and return its URL.
    ///
    /// Runs inside the checkout so `gh` can resolve the pushed branch.
    ///
    /// # Errors
    /// Returns an error if the `gh` CLI command fails or prints no URL.
    pub async fn create_pull_request(
        &self,
        checkout: &Path,
        pr: &PullRequestSpec<'_>,
    ) -> Result<String, ToolError> {
        let spec = self
            .command([
                "pr", "create", "--repo", pr.repo, "--base", pr.base, "--head", pr.head,
                "--title", pr.title, "--body", pr.body,
            ])
            .current_dir(checkout);
        let output = self.runner.run(&spec).await?;

        let url = output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| line.starts_with("http"))
            .ok_or_else(|| ToolError::InvalidOutput {
                program: self.gh_bin.clone(),
                reason: "pr create printed no URL".to_string(),
            })?
            .to_string();

        info!(repo = %pr.repo, head = %pr.head, url = %url, "Opened pull request");
        Ok(url)
    }

    /// URL of the open pull request whose head is `head`.
    ///
    /// # Errors
    /// Returns an error if no such pull request exists or `gh` prints invalid JSON.
    pub async fn find_pull_request(&self, repo: &str, head: &str) -> Result<String, ToolError> {
        let spec = self.command(["pr", "view", head, "--repo", repo, "--json", "url,state"]);
        let output = self.runner.run(&spec).await?;

        let pr: PullRequestRef =
            serde_json::from_str(&output.stdout).map_err(|e| ToolError::InvalidOutput {
                program: self.gh_bin.clone(),
                reason: format!("pr view JSON: {e}"),
            })?;
        if pr.url.is_empty() || !pr.state.eq_ignore_ascii_case("open") {
            return Err(ToolError::InvalidOutput {
                program: self.gh_bin.clone(),
                reason: format!("no open pull request for {head}"),
            });
        }

        debug!(repo = %repo, head = %head, url = %pr.url, "Found existing pull request");
        Ok(pr.url)
    }
}

/// Pull request fields read by `gh pr view --json url,state`.
#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(default)]
    url: String,
    #[serde(default)]
    state: String,
}

/// Parameters for [`GitHubCli::create_pull_request`].
#[derive(Debug, Clone, Copy)]
pub struct PullRequestSpec<'a> {
    pub repo: &'a str,
    pub base: &'a str,
    pub head: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}
