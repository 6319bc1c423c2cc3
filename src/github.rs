use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::thread;

use crate::models::{
    AgeCounts, Attachment, AttachmentSource, ClosedIssueRow, ClosedIssueStats, CmdOutput, Comment,
    Issue, IssueBundle, IssueListing, Label, OpenIssueRow, OpenIssueStats, PriorityCounts,
    StatsReport,
};
use crate::retry::{self, RetryPolicy};
use crate::runtime::{self, run_cmd};

const ATTACHMENT_HOSTS: [&str; 4] = [
    "user-attachments.githubusercontent.com",
    "private-user-images.githubusercontent.com",
    "github-production-user-asset",
    "github.com/user-attachments/",
];

/// Run a gh invocation under the retry policy. Failure after exhaustion is
/// an error carrying the attempt count and the final stderr; the retry loop
/// itself never errors on a non-zero exit.
fn gh_capture(args: &[String], policy: RetryPolicy) -> Result<CmdOutput> {
    let mut cmd = vec![runtime::gh_bin()];
    cmd.extend_from_slice(args);

    let mut last: Option<CmdOutput> = None;
    let result = retry::execute_with(
        |attempt| {
            let out = run_cmd(cmd.clone(), None, false, None)?;
            if out.code != 0 {
                eprintln!(
                    "attempt {attempt}/{} failed (exit {}): {}",
                    policy.max_attempts,
                    out.code,
                    out.stderr.trim()
                );
            }
            let code = out.code;
            last = Some(out);
            Ok(code)
        },
        policy,
        |wait| {
            eprintln!("retrying in {}s...", wait.as_secs());
            thread::sleep(wait);
        },
    )?;

    let Some(out) = last else {
        bail!("command never ran: {}", cmd.join(" "));
    };
    if !result.succeeded {
        bail!(
            "gh command failed after {} attempt(s): {}\nstderr: {}",
            result.attempts_used,
            cmd.join(" "),
            out.stderr.trim()
        );
    }
    Ok(out)
}

fn gh_json(args: &[String], policy: RetryPolicy) -> Result<Value> {
    let out = gh_capture(args, policy)?;
    serde_json::from_str(out.stdout.trim()).context("invalid JSON from gh")
}

/// `gh api --paginate` emits one JSON document per page, concatenated.
/// Parse them all and flatten arrays into a single row list.
fn gh_json_pages(args: &[String], policy: RetryPolicy) -> Result<Vec<Value>> {
    let out = gh_capture(args, policy)?;
    let mut rows = Vec::new();
    for doc in serde_json::Deserializer::from_str(&out.stdout).into_iter::<Value>() {
        match doc.context("invalid JSON page from gh")? {
            Value::Array(page) => rows.extend(page),
            other => rows.push(other),
        }
    }
    Ok(rows)
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

pub fn fetch_issue(repo: &str, number: u64, policy: RetryPolicy) -> Result<IssueBundle> {
    println!("Fetching issue #{number} from {repo}...");
    let issue: Issue =
        serde_json::from_value(gh_json(&args(&["api", &format!("repos/{repo}/issues/{number}")]), policy)?)
            .context("unexpected issue payload from gh")?;

    let comment_rows = gh_json_pages(
        &args(&[
            "api",
            &format!("repos/{repo}/issues/{number}/comments"),
            "--paginate",
        ]),
        policy,
    )?;
    let mut comments = Vec::new();
    for row in comment_rows {
        let comment: Comment =
            serde_json::from_value(row).context("unexpected comment payload from gh")?;
        comments.push(comment);
    }
    println!("Fetched {} comment(s)", comments.len());

    let mut attachments =
        extract_attachments(issue.body.as_deref().unwrap_or(""), AttachmentSource::IssueBody);
    for comment in &comments {
        attachments.extend(extract_attachments(
            comment.body.as_deref().unwrap_or(""),
            AttachmentSource::Comment { id: comment.id },
        ));
    }
    if !attachments.is_empty() {
        println!("Found {} attachment(s)", attachments.len());
    }

    Ok(IssueBundle {
        repo: repo.to_string(),
        number,
        run_id: runtime::create_run_id(),
        fetched_at: runtime::now_iso(),
        issue,
        comments,
        attachments,
    })
}

/// Attachment URLs in a body: markdown images plus inline `<img>`/`<a>`
/// tags, restricted to GitHub attachment hosts. URLs are captured up to the
/// first whitespace or `)`; the host filter keeps that shortcut safe since
/// GitHub asset URLs contain neither.
pub fn extract_attachments(body: &str, source: AttachmentSource) -> Vec<Attachment> {
    if body.is_empty() {
        return Vec::new();
    }
    let patterns = [
        r"!\[[^\]]*\]\(([^)\s]+)",
        r#"<img[^>]*\ssrc="([^"]+)""#,
        r#"<a[^>]*\shref="([^"]+)""#,
    ];

    let mut seen = std::collections::HashSet::new();
    let mut attachments = Vec::new();
    for pattern in patterns {
        let re = Regex::new(pattern).expect("valid regex");
        for captures in re.captures_iter(body) {
            let url = captures[1].to_string();
            if !is_attachment_url(&url) || !seen.insert(url.clone()) {
                continue;
            }
            let filename = extract_filename(&url);
            let file_type = extract_file_type(&filename);
            attachments.push(Attachment {
                url,
                filename,
                file_type,
                source: source.clone(),
            });
        }
    }
    attachments
}

fn is_attachment_url(url: &str) -> bool {
    ATTACHMENT_HOSTS.iter().any(|host| url.contains(host))
}

fn extract_filename(url: &str) -> String {
    // UUID-style filename with extension, ahead of any JWT query string.
    let uuid_re = Regex::new(r"/([a-f0-9-]+\.\w+)(?:\?|$)").expect("valid regex");
    if let Some(captures) = uuid_re.captures(url) {
        return captures[1].to_string();
    }
    let tail_re = Regex::new(r"/([^/?]+)(?:\?|$)").expect("valid regex");
    if let Some(captures) = tail_re.captures(url) {
        return captures[1].to_string();
    }
    "unknown_file".to_string()
}

fn extract_file_type(filename: &str) -> String {
    let ext_re = Regex::new(r"\.(\w+)$").expect("valid regex");
    match ext_re.captures(filename) {
        Some(captures) => captures[1].to_lowercase(),
        None => "unknown".to_string(),
    }
}

/// Reader-friendly markdown rendition of a fetched bundle: metadata block,
/// body, attachment table, numbered comments.
pub fn generate_manifest(bundle: &IssueBundle) -> String {
    let mut lines: Vec<String> = Vec::new();
    let issue = &bundle.issue;
    let author = issue
        .user
        .as_ref()
        .map(|u| u.login.as_str())
        .unwrap_or("ghost");

    lines.push(format!("# Issue #{}: {}", bundle.number, issue.title));
    lines.push(String::new());
    lines.push("## Issue Metadata".to_string());
    lines.push(String::new());
    lines.push(format!("- **Repository:** {}", bundle.repo));
    lines.push(format!("- **Issue Number:** #{}", bundle.number));
    lines.push(format!("- **State:** {}", issue.state));
    lines.push(format!("- **Created:** {}", issue.created_at));
    lines.push(format!(
        "- **Updated:** {}",
        issue.updated_at.as_deref().unwrap_or("N/A")
    ));
    lines.push(format!("- **Author:** @{author}"));
    let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
    if labels.is_empty() {
        lines.push("- **Labels:** None".to_string());
    } else {
        lines.push(format!("- **Labels:** {}", labels.join(", ")));
    }
    lines.push(String::new());

    lines.push("## Issue Body".to_string());
    lines.push(String::new());
    match issue.body.as_deref() {
        Some(body) if !body.is_empty() => lines.push(body.to_string()),
        _ => lines.push("*No description provided*".to_string()),
    }
    lines.push(String::new());

    if !bundle.attachments.is_empty() {
        lines.push("## Attachments".to_string());
        lines.push(String::new());
        lines.push("| File | Type | Found In | URL |".to_string());
        lines.push("|------|------|----------|-----|".to_string());
        for attachment in &bundle.attachments {
            let found_in = match &attachment.source {
                AttachmentSource::IssueBody => "issue body".to_string(),
                AttachmentSource::Comment { id } => format!("comment {id}"),
            };
            lines.push(format!(
                "| {} | {} | {} | {} |",
                attachment.filename, attachment.file_type, found_in, attachment.url
            ));
        }
        lines.push(String::new());
    }

    if !bundle.comments.is_empty() {
        lines.push(format!("## Comments ({})", bundle.comments.len()));
        lines.push(String::new());
        for (idx, comment) in bundle.comments.iter().enumerate() {
            let comment_author = comment
                .user
                .as_ref()
                .map(|u| u.login.as_str())
                .unwrap_or("ghost");
            lines.push(format!("### Comment #{}", idx + 1));
            lines.push(String::new());
            lines.push(format!("- **Author:** @{comment_author}"));
            lines.push(format!("- **Posted:** {}", comment.created_at));
            lines.push(format!("- **Comment ID:** {}", comment.id));
            lines.push(String::new());
            match comment.body.as_deref() {
                Some(body) if !body.is_empty() => lines.push(body.to_string()),
                _ => lines.push("*No content*".to_string()),
            }
            lines.push(String::new());
        }
    }

    let mut manifest = lines.join("\n");
    manifest.push('\n');
    manifest
}

pub fn search_issues(
    repo: &str,
    label: Option<&str>,
    state: &str,
    limit: u32,
    policy: RetryPolicy,
) -> Result<IssueListing> {
    let mut query = vec![format!("repo:{repo}")];
    if state != "all" {
        query.push(format!("is:{state}"));
    }
    if let Some(label) = label {
        query.push(format!("label:{label}"));
    }

    let out = gh_json(
        &args(&[
            "issue",
            "list",
            "--repo",
            repo,
            "--search",
            &query.join(" "),
            "--limit",
            &limit.to_string(),
            "--json",
            "number,title,state,labels,createdAt,updatedAt",
        ]),
        policy,
    )?;
    match out {
        Value::Array(rows) => Ok(rows),
        other => bail!("expected a JSON array from gh issue list, got: {other}"),
    }
}

pub fn collect_stats(repo: &str, policy: RetryPolicy) -> Result<StatsReport> {
    println!("Fetching open issues...");
    let open_rows = gh_json_pages(
        &args(&["api", &format!("repos/{repo}/issues"), "--paginate"]),
        policy,
    )?;

    let week_ago = (Utc::now() - ChronoDuration::days(7)).to_rfc3339_opts(SecondsFormat::Secs, true);
    println!("Fetching issues closed since {week_ago}...");
    let closed_rows = gh_json_pages(
        &args(&[
            "api",
            &format!("repos/{repo}/issues?state=closed&since={week_ago}"),
            "--paginate",
        ]),
        policy,
    )?;

    let open = issues_without_pull_requests(open_rows)?;
    let closed = issues_without_pull_requests(closed_rows)?;
    compute_stats(repo, Utc::now(), &open, &closed)
}

fn issues_without_pull_requests(rows: Vec<Value>) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();
    for row in rows {
        if row.get("pull_request").is_some() {
            continue;
        }
        let issue: Issue =
            serde_json::from_value(row).context("unexpected issue payload from gh")?;
        issues.push(issue);
    }
    Ok(issues)
}

pub fn compute_stats(
    repo: &str,
    now: DateTime<Utc>,
    open: &[Issue],
    closed: &[Issue],
) -> Result<StatsReport> {
    let mut by_priority = PriorityCounts::default();
    let mut by_age = AgeCounts::default();
    let mut by_area: HashMap<String, usize> = HashMap::new();
    let mut with_bug_label = 0;
    let mut with_enhancement_label = 0;
    let mut open_rows = Vec::new();

    for issue in open {
        let created = parse_timestamp(&issue.created_at)?;
        let age_days = (now - created).num_days();
        let priority = priority_of(&issue.labels);

        match priority {
            "critical" => by_priority.critical += 1,
            "high" => by_priority.high += 1,
            "medium" => by_priority.medium += 1,
            "low" => by_priority.low += 1,
            _ => by_priority.unprioritized += 1,
        }
        match age_days {
            d if d < 1 => by_age.new += 1,
            d if d <= 7 => by_age.recent += 1,
            d if d <= 30 => by_age.active += 1,
            d if d <= 90 => by_age.stale += 1,
            _ => by_age.ancient += 1,
        }
        for label in &issue.labels {
            let name = label.name.to_lowercase();
            if let Some(area) = name.strip_prefix("area:") {
                *by_area.entry(area.trim().to_string()).or_insert(0) += 1;
            }
            if name == "bug" {
                with_bug_label += 1;
            }
            if name == "enhancement" {
                with_enhancement_label += 1;
            }
        }

        open_rows.push(OpenIssueRow {
            number: issue.number,
            title: issue.title.clone(),
            url: issue.html_url.clone(),
            created_at: issue.created_at.clone(),
            age_days,
            priority: priority.to_string(),
            labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        });
    }

    let mut closed_rows = Vec::new();
    let mut total_close_hours = 0.0;
    for issue in closed {
        let Some(closed_at) = &issue.closed_at else {
            continue;
        };
        let created = parse_timestamp(&issue.created_at)?;
        let closed_time = parse_timestamp(closed_at)?;
        let hours = round_tenth((closed_time - created).num_seconds() as f64 / 3600.0);
        total_close_hours += hours;
        closed_rows.push(ClosedIssueRow {
            number: issue.number,
            title: issue.title.clone(),
            url: issue.html_url.clone(),
            closed_at: closed_at.clone(),
            time_to_close_hours: hours,
        });
    }
    let average_time_to_close_hours = if closed_rows.is_empty() {
        0.0
    } else {
        round_tenth(total_close_hours / closed_rows.len() as f64)
    };

    Ok(StatsReport {
        repository: repo.to_string(),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        open_issues: OpenIssueStats {
            total: open.len(),
            by_priority,
            by_age,
            by_area,
            with_bug_label,
            with_enhancement_label,
        },
        closed_last_7_days: ClosedIssueStats {
            total: closed.len(),
            average_time_to_close_hours,
        },
        open: open_rows,
        recently_closed: closed_rows,
    })
}

fn priority_of(labels: &[Label]) -> &'static str {
    let mut priority = "unprioritized";
    for label in labels {
        let name = label.name.to_lowercase();
        if name.contains("critical") {
            return "critical";
        }
        if name.contains("high") {
            priority = "high";
        } else if name.contains("medium") && priority == "unprioritized" {
            priority = "medium";
        } else if name.contains("low") && priority == "unprioritized" {
            priority = "low";
        }
    }
    priority
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp: {raw}"))
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn edit_labels(
    repo: &str,
    number: u64,
    add: &[String],
    remove: &[String],
    policy: RetryPolicy,
) -> Result<()> {
    let mut cmd = args(&["issue", "edit", &number.to_string(), "--repo", repo]);
    for label in add {
        cmd.push("--add-label".to_string());
        cmd.push(label.clone());
    }
    for label in remove {
        cmd.push("--remove-label".to_string());
        cmd.push(label.clone());
    }
    gh_capture(&cmd, policy)?;
    Ok(())
}

pub fn dispatch_workflow(
    repo: &str,
    workflow: &str,
    git_ref: Option<&str>,
    fields: &[(String, String)],
    policy: RetryPolicy,
) -> Result<()> {
    let mut cmd = args(&["workflow", "run", workflow, "--repo", repo]);
    if let Some(git_ref) = git_ref {
        cmd.push("--ref".to_string());
        cmd.push(git_ref.to_string());
    }
    for (key, value) in fields {
        cmd.push("-f".to_string());
        cmd.push(format!("{key}={value}"));
    }
    gh_capture(&cmd, policy)?;
    Ok(())
}

pub fn create_issue(
    repo: &str,
    title: &str,
    body: &str,
    labels: &[String],
    policy: RetryPolicy,
) -> Result<String> {
    let mut cmd = args(&["issue", "create", "--repo", repo, "--title", title, "--body", body]);
    for label in labels {
        cmd.push("--label".to_string());
        cmd.push(label.clone());
    }
    let out = gh_capture(&cmd, policy)?;
    Ok(out.stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn issue(number: u64, labels: &[&str], created_at: &str, closed_at: Option<&str>) -> Issue {
        Issue {
            number,
            title: format!("issue {number}"),
            state: if closed_at.is_some() { "closed" } else { "open" }.to_string(),
            body: None,
            html_url: format!("https://github.com/o/r/issues/{number}"),
            user: None,
            labels: labels
                .iter()
                .map(|name| Label {
                    name: name.to_string(),
                })
                .collect(),
            created_at: created_at.to_string(),
            updated_at: None,
            closed_at: closed_at.map(ToString::to_string),
        }
    }

    #[test]
    fn markdown_image_on_attachment_host_is_extracted() {
        let body = "Look:\n\n![crash](https://user-attachments.githubusercontent.com/12/abc-12ef.png)\n";
        let found = extract_attachments(body, AttachmentSource::IssueBody);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "abc-12ef.png");
        assert_eq!(found[0].file_type, "png");
    }

    #[test]
    fn html_img_and_anchor_tags_are_extracted() {
        let body = concat!(
            r#"<img width="200" src="https://private-user-images.githubusercontent.com/9/deadbeef-01.jpeg?jwt=abc">"#,
            "\n",
            r#"<a target="_blank" href="https://github.com/user-attachments/files/1/report.pdf">report</a>"#,
        );
        let found = extract_attachments(body, AttachmentSource::IssueBody);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].filename, "deadbeef-01.jpeg");
        assert_eq!(found[0].file_type, "jpeg");
        assert_eq!(found[1].filename, "report.pdf");
        assert_eq!(found[1].file_type, "pdf");
    }

    #[test]
    fn urls_on_other_hosts_are_ignored() {
        let body = "![logo](https://example.com/logo.png) and <a href=\"https://imgur.com/x.png\">x</a>";
        assert!(extract_attachments(body, AttachmentSource::IssueBody).is_empty());
    }

    #[test]
    fn uuid_filename_wins_over_jwt_query_noise() {
        let url =
            "https://private-user-images.githubusercontent.com/123/a1b2-c3d4.png?jwt=eyJhbGci.red-herring.sig";
        assert_eq!(extract_filename(url), "a1b2-c3d4.png");
    }

    #[test]
    fn extensionless_asset_urls_fall_back_to_path_tail() {
        let url = "https://github.com/user-attachments/assets/0f9e8d7c";
        assert_eq!(extract_filename(url), "0f9e8d7c");
        assert_eq!(extract_file_type("0f9e8d7c"), "unknown");
    }

    #[test]
    fn duplicate_urls_are_reported_once() {
        let body = concat!(
            "![a](https://user-attachments.githubusercontent.com/1/aa-bb.png)\n",
            r#"<img src="https://user-attachments.githubusercontent.com/1/aa-bb.png">"#,
        );
        assert_eq!(extract_attachments(body, AttachmentSource::IssueBody).len(), 1);
    }

    #[test]
    fn critical_label_wins_regardless_of_position() {
        let labels = vec![
            Label {
                name: "priority: low".to_string(),
            },
            Label {
                name: "sev-critical".to_string(),
            },
        ];
        assert_eq!(priority_of(&labels), "critical");
    }

    #[test]
    fn high_overrides_earlier_medium() {
        let labels = vec![
            Label {
                name: "priority: medium".to_string(),
            },
            Label {
                name: "priority: high".to_string(),
            },
        ];
        assert_eq!(priority_of(&labels), "high");
    }

    #[test]
    fn unlabeled_issues_are_unprioritized() {
        assert_eq!(priority_of(&[]), "unprioritized");
    }

    #[test]
    fn stats_bucket_ages_and_average_close_time() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).single().expect("valid time");
        let open = vec![
            issue(1, &["bug", "priority: high"], "2026-08-07T08:00:00Z", None),
            issue(2, &["area: parser"], "2026-08-02T08:00:00Z", None),
            issue(3, &["enhancement"], "2025-01-01T00:00:00Z", None),
        ];
        let closed = vec![
            issue(
                4,
                &[],
                "2026-08-05T00:00:00Z",
                Some("2026-08-05T05:00:00Z"),
            ),
            issue(
                5,
                &[],
                "2026-08-06T00:00:00Z",
                Some("2026-08-06T02:00:00Z"),
            ),
        ];

        let report = compute_stats("o/r", now, &open, &closed).expect("stats");
        assert_eq!(report.open_issues.total, 3);
        assert_eq!(report.open_issues.by_priority.high, 1);
        assert_eq!(report.open_issues.by_priority.unprioritized, 2);
        assert_eq!(report.open_issues.by_age.new, 1);
        assert_eq!(report.open_issues.by_age.recent, 1);
        assert_eq!(report.open_issues.by_age.ancient, 1);
        assert_eq!(report.open_issues.by_area.get("parser"), Some(&1));
        assert_eq!(report.open_issues.with_bug_label, 1);
        assert_eq!(report.open_issues.with_enhancement_label, 1);
        assert_eq!(report.closed_last_7_days.total, 2);
        assert_eq!(report.closed_last_7_days.average_time_to_close_hours, 3.5);
    }

    #[test]
    fn closed_issue_without_timestamp_is_skipped_in_rows() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).single().expect("valid time");
        let closed = vec![issue(9, &[], "2026-08-06T00:00:00Z", None)];
        let report = compute_stats("o/r", now, &[], &closed).expect("stats");
        assert_eq!(report.closed_last_7_days.total, 1);
        assert!(report.recently_closed.is_empty());
        assert_eq!(report.closed_last_7_days.average_time_to_close_hours, 0.0);
    }

    #[test]
    fn manifest_covers_metadata_body_attachments_and_comments() {
        let mut fetched = issue(7, &["bug"], "2026-08-01T00:00:00Z", None);
        fetched.title = "Parser crash on empty input".to_string();
        fetched.body = Some(
            "Crashes.\n\n![trace](https://user-attachments.githubusercontent.com/2/aa-01.png)"
                .to_string(),
        );
        let bundle = IssueBundle {
            repo: "o/r".to_string(),
            number: 7,
            run_id: "20260807120000-abcdef".to_string(),
            fetched_at: "2026-08-07T12:00:00Z".to_string(),
            attachments: extract_attachments(
                fetched.body.as_deref().unwrap_or(""),
                AttachmentSource::IssueBody,
            ),
            comments: vec![Comment {
                id: 31,
                user: None,
                body: Some("same here".to_string()),
                created_at: "2026-08-02T00:00:00Z".to_string(),
            }],
            issue: fetched,
        };

        let manifest = generate_manifest(&bundle);
        assert!(manifest.contains("# Issue #7: Parser crash on empty input"));
        assert!(manifest.contains("- **Labels:** bug"));
        assert!(manifest.contains("## Attachments"));
        assert!(manifest.contains("| aa-01.png | png | issue body |"));
        assert!(manifest.contains("## Comments (1)"));
        assert!(manifest.contains("same here"));
    }
}
