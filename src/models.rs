use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub handle: Option<String>,
    pub base_tools: Option<Vec<String>>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: String,
}

/// Where an attachment URL was found: the issue body or a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSource {
    IssueBody,
    Comment { id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub file_type: String,
    pub source: AttachmentSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueBundle {
    pub repo: String,
    pub number: u64,
    pub run_id: String,
    pub fetched_at: String,
    pub issue: Issue,
    pub comments: Vec<Comment>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PriorityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unprioritized: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgeCounts {
    pub new: usize,
    pub recent: usize,
    pub active: usize,
    pub stale: usize,
    pub ancient: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpenIssueStats {
    pub total: usize,
    pub by_priority: PriorityCounts,
    pub by_age: AgeCounts,
    pub by_area: HashMap<String, usize>,
    pub with_bug_label: usize,
    pub with_enhancement_label: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClosedIssueStats {
    pub total: usize,
    pub average_time_to_close_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIssueRow {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub created_at: String,
    pub age_days: i64,
    pub priority: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedIssueRow {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub closed_at: String,
    pub time_to_close_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub repository: String,
    pub timestamp: String,
    pub open_issues: OpenIssueStats,
    pub closed_last_7_days: ClosedIssueStats,
    pub open: Vec<OpenIssueRow>,
    pub recently_closed: Vec<ClosedIssueRow>,
}

#[derive(Debug)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Loose passthrough for `gh issue list --json` rows; the listing surface is
/// gh's, not ours, so we keep it untyped.
pub type IssueListing = Vec<Value>;
