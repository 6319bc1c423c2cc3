use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_HANDLE: &str = "claude";
pub const DEFAULT_BASE_TOOLS: [&str; 4] = ["read", "grep", "glob", "comment"];
pub const DEFAULT_ISSUE_STATE: &str = "open";
pub const DEFAULT_ISSUE_LIMIT: u32 = 100;

#[derive(Debug, Parser)]
#[command(name = "warden")]
#[command(about = "CI gatekeeper for an automated coding agent: comment-driven capability grants and gh plumbing with retries.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command, retrying non-zero exits with exponential backoff.
    Retry(RetryArgs),
    /// Classify a comment body into capability grants and a tool allow-list.
    Classify(ClassifyArgs),
    /// Fetch an issue with comments and attachment metadata into a bundle.
    FetchIssue(FetchIssueArgs),
    /// List issues matching a search filter.
    Issues(IssuesArgs),
    /// Collect open/closed issue statistics.
    Stats(StatsArgs),
    /// Render a prompt template by placeholder substitution.
    RenderPrompt(RenderPromptArgs),
    /// Add or remove labels on an issue.
    Label(LabelArgs),
    /// Trigger a workflow dispatch.
    Dispatch(DispatchArgs),
    /// Open a new issue.
    CreateIssue(CreateIssueArgs),
}

#[derive(Debug, Args)]
pub struct RetryArgs {
    #[arg(long)]
    pub max_attempts: Option<u32>,
    #[arg(long)]
    pub backoff_base: Option<u64>,
    /// Command and arguments to run.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Comment body to classify; falls back to --text-file, then WARDEN_COMMENT_BODY.
    #[arg(long)]
    pub text: Option<String>,
    #[arg(long)]
    pub text_file: Option<PathBuf>,
    /// Mention handle that gates classification, without the leading '@'.
    #[arg(long)]
    pub handle: Option<String>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FetchIssueArgs {
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub number: u64,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct IssuesArgs {
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub label: Option<String>,
    /// open, closed, or all.
    #[arg(long, default_value = DEFAULT_ISSUE_STATE)]
    pub state: String,
    #[arg(long, default_value_t = DEFAULT_ISSUE_LIMIT)]
    pub limit: u32,
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RenderPromptArgs {
    #[arg(long)]
    pub template: PathBuf,
    /// KEY=VALUE pair; repeatable, wins over --vars-file on collision.
    #[arg(long = "var")]
    pub vars: Vec<String>,
    #[arg(long)]
    pub vars_file: Option<PathBuf>,
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct LabelArgs {
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub number: u64,
    #[arg(long = "add")]
    pub add: Vec<String>,
    #[arg(long = "remove")]
    pub remove: Vec<String>,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub workflow: String,
    #[arg(long = "ref")]
    pub git_ref: Option<String>,
    /// KEY=VALUE workflow input; repeatable.
    #[arg(long = "field")]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CreateIssueArgs {
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub body: Option<String>,
    #[arg(long)]
    pub body_file: Option<PathBuf>,
    #[arg(long = "label")]
    pub labels: Vec<String>,
}
