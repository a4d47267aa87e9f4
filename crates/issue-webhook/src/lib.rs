//! GitHub issue webhook service driven by the Claude CLI.
//!
//! This crate provides:
//! - Webhook signature verification (HMAC-SHA256)
//! - Event classification by issue label
//! - Discuss and implement workflows built on `claude`, `gh` and `git`
//! - HTTP server for webhook handling (standalone service)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod github;
pub mod runner;
pub mod server;
pub mod webhooks;
pub mod workflow;

pub use config::Config;
pub use error::{ConfigError, SignatureError, ToolError, WebhookError};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use server::{build_router, run_server, AppState};
pub use webhooks::{classify, sign_payload, verify_signature, Dispatch, EventKind, IssueEvent};
pub use workflow::{Dispatcher, WorkflowOutcome};
