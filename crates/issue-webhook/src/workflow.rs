//! Discuss and implement workflows.
//!
//! Each workflow is a fixed sequence of external commands. The first failing
//! step aborts the run; the failure is reported back on the issue and turned
//! into a [`WorkflowOutcome`] instead of an error, so the webhook delivery is
//! still acknowledged.

use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, REPLY_SIGNATURE};
use crate::error::ToolError;
use crate::github::{GitHubCli, IssueDetails, PullRequestSpec};
use crate::runner::{CommandRunner, CommandSpec};
use crate::webhooks::{Dispatch, IssueEvent};

/// Result of running a workflow for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// Discussion reply posted
    Commented,
    /// Pull request opened
    PullRequestOpened { url: String },
    /// Nothing to do for this delivery
    Skipped { reason: String },
    /// A step failed; a failure comment was attempted
    Failed { step: String, reason: String },
}

/// A workflow step failure: which step, and why.
#[derive(Debug)]
struct StepError {
    step: &'static str,
    source: ToolError,
}

trait StepContext<T> {
    fn step(self, step: &'static str) -> Result<T, StepError>;
}

impl<T> StepContext<T> for Result<T, ToolError> {
    fn step(self, step: &'static str) -> Result<T, StepError> {
        self.map_err(|source| StepError { step, source })
    }
}

/// Runs workflows against the external CLIs.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    github: GitHubCli,
}

impl Dispatcher {
    /// Create a dispatcher that runs commands through `runner`.
    #[must_use]
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        let github = GitHubCli::new(runner.clone(), &config.gh_bin, config.command_timeout);
        Self {
            config,
            runner,
            github,
        }
    }

    /// Run the workflow selected by `dispatch`.
    pub async fn dispatch(&self, dispatch: &Dispatch, event: &IssueEvent) -> WorkflowOutcome {
        match dispatch {
            Dispatch::Discuss => self.discuss(event).await,
            Dispatch::Implement => self.implement(event).await,
            Dispatch::Ignore(reason) => WorkflowOutcome::Skipped {
                reason: reason.clone(),
            },
        }
    }

    /// Reply on the issue with an analysis from the AI CLI.
    pub async fn discuss(&self, event: &IssueEvent) -> WorkflowOutcome {
        let repo = event.repository.full_name.as_str();
        let number = event.issue.number;
        info!(repo = %repo, issue = number, "Starting discuss workflow");

        match self.run_discuss(event).await {
            Ok(true) => {
                info!(repo = %repo, issue = number, "Discuss workflow completed");
                WorkflowOutcome::Commented
            }
            Ok(false) => {
                info!(repo = %repo, issue = number, "Latest comment is already a reply, skipping");
                WorkflowOutcome::Skipped {
                    reason: "reply already posted".to_string(),
                }
            }
            Err(e) => self.report_failure(event, e).await,
        }
    }

    /// Returns `false` when a comment delivery finds the conversation already
    /// ending with our reply.
    async fn run_discuss(&self, event: &IssueEvent) -> Result<bool, StepError> {
        let repo = event.repository.full_name.as_str();
        let number = event.issue.number;

        let details = self
            .github
            .view_issue(repo, number)
            .await
            .step("fetch issue")?;

        // A newly added label always gets a reply, even right after one of
        // our failure or pull request notices
        if event.comment.is_some() && ends_with_reply(&details) {
            return Ok(false);
        }

        let spec = CommandSpec::new(&self.config.claude_bin, self.config.claude_timeout)
            .args(["-p"])
            .stdin(discuss_prompt(&details));
        let output = self.runner.run(&spec).await.step("run claude")?;

        let reply = output.stdout.trim();
        if reply.is_empty() {
            return Err(StepError {
                step: "run claude",
                source: ToolError::InvalidOutput {
                    program: self.config.claude_bin.clone(),
                    reason: "empty response".to_string(),
                },
            });
        }

        self.github
            .comment_on_issue(repo, number, &format!("{reply}{REPLY_SIGNATURE}"))
            .await
            .step("post comment")?;
        Ok(true)
    }

    /// Implement the issue on a fresh branch and open a pull request.
    pub async fn implement(&self, event: &IssueEvent) -> WorkflowOutcome {
        let repo = event.repository.full_name.as_str();
        let number = event.issue.number;
        info!(repo = %repo, issue = number, "Starting implement workflow");

        match self.run_implement(event).await {
            Ok(url) => {
                info!(repo = %repo, issue = number, url = %url, "Implement workflow completed");
                let notice = format!("🚀 Pull request for this issue: {url}{REPLY_SIGNATURE}");
                if let Err(e) = self.github.comment_on_issue(repo, number, &notice).await {
                    warn!(repo = %repo, issue = number, error = %e, "Failed to link pull request on issue");
                }
                WorkflowOutcome::PullRequestOpened { url }
            }
            Err(e) => self.report_failure(event, e).await,
        }
    }

    async fn run_implement(&self, event: &IssueEvent) -> Result<String, StepError> {
        let repo = &event.repository;
        let number = event.issue.number;
        let base = repo.default_branch();
        let branch = branch_name(number);
        let checkout = self.checkout_dir(event);

        self.prepare_checkout(event, &checkout).await?;

        let upstream = format!("origin/{base}");
        self.git(&checkout, ["checkout", "-B", branch.as_str(), upstream.as_str()])
            .await
            .step("create branch")?;

        let spec = CommandSpec::new(&self.config.claude_bin, self.config.claude_timeout)
            .args(["-p", "--dangerously-skip-permissions"])
            .stdin(implement_prompt(event))
            .current_dir(&checkout);
        self.runner.run(&spec).await.step("run claude")?;

        let status = self
            .git(&checkout, ["status", "--porcelain"])
            .await
            .step("inspect changes")?;
        if status.trim().is_empty() {
            return Err(StepError {
                step: "inspect changes",
                source: ToolError::InvalidOutput {
                    program: self.config.claude_bin.clone(),
                    reason: "no changes produced".to_string(),
                },
            });
        }

        self.git(&checkout, ["add", "-A"]).await.step("commit")?;
        let message = format!("{} (#{number})", event.issue.title.trim());
        self.git(&checkout, ["commit", "-m", message.as_str()])
            .await
            .step("commit")?;
        self.git(&checkout, ["push", "--force", "-u", "origin", branch.as_str()])
            .await
            .step("push")?;

        let title = format!("{} (#{number})", event.issue.title.trim());
        let body = pull_request_body(number);
        let created = self
            .github
            .create_pull_request(
                &checkout,
                &PullRequestSpec {
                    repo: &repo.full_name,
                    base,
                    head: &branch,
                    title: &title,
                    body: &body,
                },
            )
            .await;

        match created {
            Ok(url) => Ok(url),
            // A rerun force-pushes onto the branch of a pull request that is
            // still open; `gh pr create` refuses a second one for that head
            Err(create_err @ ToolError::Failed { .. }) => {
                match self.github.find_pull_request(&repo.full_name, &branch).await {
                    Ok(url) => {
                        info!(
                            repo = %repo.full_name,
                            head = %branch,
                            url = %url,
                            "Updated existing pull request"
                        );
                        Ok(url)
                    }
                    Err(lookup_err) => {
                        debug!(head = %branch, error = %lookup_err, "No existing pull request");
                        Err(StepError {
                            step: "open pull request",
                            source: create_err,
                        })
                    }
                }
            }
            Err(e) => Err(StepError {
                step: "open pull request",
                source: e,
            }),
        }
    }

    /// Clone the repository for this issue, or refresh an existing clone.
    async fn prepare_checkout(&self, event: &IssueEvent, checkout: &Path) -> Result<(), StepError> {
        let base = event.repository.default_branch();

        if checkout.join(".git").exists() {
            info!(path = %checkout.display(), "Reusing existing checkout");
            self.git(checkout, ["fetch", "--depth", "1", "origin", base])
                .await
                .step("fetch repository")?;
            // Leftovers from an earlier failed run
            self.git(checkout, ["reset", "--hard"])
                .await
                .step("fetch repository")?;
            self.git(checkout, ["clean", "-fd"])
                .await
                .step("fetch repository")?;
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.workdir)
            .await
            .map_err(ToolError::from)
            .step("clone repository")?;

        // Cloned from inside the workdir, so the bare directory name is enough
        let target = checkout.file_name().map_or_else(
            || checkout.to_string_lossy().to_string(),
            |name| name.to_string_lossy().to_string(),
        );
        let spec = CommandSpec::new(&self.config.git_bin, self.config.command_timeout)
            .args([
                "clone".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "--branch".to_string(),
                base.to_string(),
                event.repository.clone_source(),
                target,
            ])
            .current_dir(&self.config.workdir);
        self.runner.run(&spec).await.step("clone repository")?;

        info!(repo = %event.repository.full_name, path = %checkout.display(), "Cloned repository");
        Ok(())
    }

    async fn git<I, S>(&self, checkout: &Path, args: I) -> Result<String, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new(&self.config.git_bin, self.config.command_timeout)
            .args(args)
            .current_dir(checkout);
        Ok(self.runner.run(&spec).await?.stdout)
    }

    /// Per-issue checkout directory under the work directory.
    #[must_use]
    pub fn checkout_dir(&self, event: &IssueEvent) -> PathBuf {
        self.config.workdir.join(format!(
            "{}-issue-{}",
            event.repository.short_name(),
            event.issue.number
        ))
    }

    /// Post a failure comment and convert the error into an outcome.
    async fn report_failure(&self, event: &IssueEvent, err: StepError) -> WorkflowOutcome {
        let repo = event.repository.full_name.as_str();
        let number = event.issue.number;
        error!(
            repo = %repo,
            issue = number,
            step = err.step,
            error = %err.source,
            "Workflow failed"
        );

        let comment = failure_comment(err.step, &err.source);
        if let Err(e) = self.github.comment_on_issue(repo, number, &comment).await {
            warn!(repo = %repo, issue = number, error = %e, "Failed to post failure comment");
        }

        WorkflowOutcome::Failed {
            step: err.step.to_string(),
            reason: err.source.to_string(),
        }
    }
}

/// Branch used for an issue's implementation.
#[must_use]
pub fn branch_name(issue_number: u64) -> String {
    format!("claude/issue-{issue_number}")
}

/// Whether the latest comment on the issue is one of ours.
fn ends_with_reply(details: &IssueDetails) -> bool {
    details
        .last_comment_body()
        .is_some_and(|body| body.trim_end().ends_with(REPLY_SIGNATURE.trim_end()))
}

fn discuss_prompt(details: &IssueDetails) -> String {
    let issue_json =
        serde_json::to_string_pretty(details).unwrap_or_else(|_| details.title.clone());
    format!(
        "You are a professional software development assistant. Analyze the following \
GitHub issue and write a constructive reply. The issue, including its conversation so far, \
is given as JSON:\n\n{issue_json}\n\n\
Based on the conversation history, reply or continue the discussion. Consider:\n\
1. An analysis of the issue (on the first reply) or a response to the latest comment\n\
2. Suggested next steps or directions for a solution\n\
3. Exactly what additional information is needed, if any\n\
4. Emoji where it makes the reply friendlier\n\n\
Keep the tone professional but friendly. Reply in the language the issue is written in.\n"
    )
}

fn implement_prompt(event: &IssueEvent) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Implement GitHub issue #{} in this repository ({}).\n",
        event.issue.number, event.repository.full_name
    );
    let _ = writeln!(prompt, "Title: {}\n", event.issue.title);
    if let Some(body) = event.issue.body.as_deref().filter(|b| !b.trim().is_empty()) {
        let _ = writeln!(prompt, "Description:\n{body}\n");
    }
    prompt.push_str(
        "Make the code changes needed to resolve the issue, following the conventions \
already used in the codebase. Add or update tests where appropriate. Do not commit, push \
or switch branches; leave the changes in the working tree.\n",
    );
    prompt
}

fn pull_request_body(issue_number: u64) -> String {
    format!(
        "Closes #{issue_number}\n\nThis pull request was generated automatically from the \
issue description.{REPLY_SIGNATURE}"
    )
}

fn failure_comment(step: &str, err: &ToolError) -> String {
    let reason = match err {
        ToolError::Timeout { .. } => "the operation took too long and was stopped".to_string(),
        other => other.to_string(),
    };
    format!(
        "🤖 Automated processing failed at step **{step}**: {reason}\n\n\
A maintainer will look at this issue later.{REPLY_SIGNATURE}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn event() -> IssueEvent {
        serde_json::from_value(json!({
            "action": "labeled",
            "issue": {
                "number": 42,
                "title": "Add dark mode ",
                "body": "Users keep asking for it.",
                "labels": [{ "name": "claude-implement" }]
            },
            "label": { "name": "claude-implement" },
            "repository": { "full_name": "acme/widgets", "default_branch": "develop" }
        }))
        .unwrap()
    }

    #[test]
    fn test_branch_name() {
        assert_eq!(branch_name(42), "claude/issue-42");
    }

    #[test]
    fn test_implement_prompt_includes_issue() {
        let prompt = implement_prompt(&event());
        assert!(prompt.contains("#42"));
        assert!(prompt.contains("acme/widgets"));
        assert!(prompt.contains("Users keep asking for it."));
    }

    #[test]
    fn test_discuss_prompt_embeds_json() {
        let details = IssueDetails {
            title: "Add dark mode".to_string(),
            body: "Please".to_string(),
            ..Default::default()
        };
        let prompt = discuss_prompt(&details);
        assert!(prompt.contains("\"title\": \"Add dark mode\""));
    }

    #[test]
    fn test_failure_comment_is_signed() {
        let err = ToolError::Timeout {
            program: "claude".to_string(),
            timeout: Duration::from_secs(5),
        };
        let comment = failure_comment("run claude", &err);
        assert!(comment.contains("run claude"));
        assert!(comment.ends_with(REPLY_SIGNATURE));
    }

    #[test]
    fn test_ends_with_reply() {
        let mut details = IssueDetails::default();
        assert!(!ends_with_reply(&details));

        details.comments.push(crate::github::IssueComment {
            author: None,
            body: format!("Looks good.{REPLY_SIGNATURE}\n"),
        });
        assert!(ends_with_reply(&details));

        details.comments.push(crate::github::IssueComment {
            author: None,
            body: "What about mobile?".to_string(),
        });
        assert!(!ends_with_reply(&details));
    }

    #[test]
    fn test_pull_request_body_closes_issue() {
        assert!(pull_request_body(42).starts_with("Closes #42"));
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(WorkflowOutcome::PullRequestOpened {
            url: "https://github.com/acme/widgets/pull/1".to_string(),
        })
        .unwrap();
        assert_eq!(value["status"], "pull_request_opened");
        assert_eq!(value["url"], "https://github.com/acme/widgets/pull/1");

        let value = serde_json::to_value(WorkflowOutcome::Commented).unwrap();
        assert_eq!(value, json!({ "status": "commented" }));
    }
}
