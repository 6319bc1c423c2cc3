use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use std::fs;
use std::thread;

use crate::cli::{
    ClassifyArgs, Commands, CreateIssueArgs, DEFAULT_BASE_TOOLS, DEFAULT_HANDLE, DispatchArgs,
    FetchIssueArgs, IssuesArgs, LabelArgs, RenderPromptArgs, RetryArgs, StatsArgs,
};
use crate::classify::{Capability, build_tool_list, classify};
use crate::models::{Config, StatsReport};
use crate::prompt;
use crate::retry;
use crate::runtime::{
    self, COMMENT_BODY_ENV, default_output_dir, emit_outputs, load_config, mkdirp,
    parse_key_value, print_json, require_repo, resolve_retry_policy, write_json,
};
use crate::github;

pub fn execute(command: Commands) -> Result<i32> {
    match command {
        Commands::Retry(args) => cmd_retry(&args),
        Commands::Classify(args) => cmd_classify(&args),
        Commands::FetchIssue(args) => cmd_fetch_issue(&args),
        Commands::Issues(args) => cmd_issues(&args),
        Commands::Stats(args) => cmd_stats(&args),
        Commands::RenderPrompt(args) => cmd_render_prompt(&args),
        Commands::Label(args) => cmd_label(&args),
        Commands::Dispatch(args) => cmd_dispatch(&args),
        Commands::CreateIssue(args) => cmd_create_issue(&args),
    }
}

fn cmd_retry(args: &RetryArgs) -> Result<i32> {
    let policy = resolve_retry_policy(args.max_attempts, args.backoff_base)?;
    let result = retry::execute_with(
        |attempt| {
            let code = runtime::run_status(&args.command)?;
            if code != 0 {
                eprintln!(
                    "attempt {attempt}/{} failed (exit {code})",
                    policy.max_attempts
                );
            }
            Ok(code)
        },
        policy,
        |wait| {
            eprintln!("retrying in {}s...", wait.as_secs());
            thread::sleep(wait);
        },
    )?;

    if !result.succeeded {
        eprintln!(
            "giving up after {} attempt(s): {}",
            result.attempts_used,
            args.command.join(" ")
        );
    }
    Ok(result.exit_code)
}

fn cmd_classify(args: &ClassifyArgs) -> Result<i32> {
    let config = optional_config(args.config.as_deref())?;
    let handle = args
        .handle
        .clone()
        .or_else(|| config.handle.clone())
        .unwrap_or_else(|| DEFAULT_HANDLE.to_string());
    let base_tools: Vec<String> = config
        .base_tools
        .clone()
        .unwrap_or_else(|| DEFAULT_BASE_TOOLS.iter().map(ToString::to_string).collect());

    let text = resolve_comment_text(args)?;
    let classification = classify(&text, &handle);
    let tools = build_tool_list(&classification, &base_tools);

    let mut pairs = vec![("proceed".to_string(), classification.proceed.to_string())];
    for capability in Capability::ALL {
        pairs.push((
            capability.key().to_string(),
            classification.is_granted(capability).to_string(),
        ));
    }
    pairs.push(("tools".to_string(), tools.join(",")));
    emit_outputs(&pairs)?;

    if args.json {
        let flags: serde_json::Map<String, Value> = Capability::ALL
            .into_iter()
            .map(|capability| {
                (
                    capability.key().to_string(),
                    Value::Bool(classification.is_granted(capability)),
                )
            })
            .collect();
        print_json(&json!({
            "proceed": classification.proceed,
            "flags": flags,
            "tools": tools,
        }))?;
    }
    Ok(0)
}

fn resolve_comment_text(args: &ClassifyArgs) -> Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    if let Some(path) = &args.text_file {
        return fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()));
    }
    if let Some(text) = runtime::comment_body_from_env() {
        return Ok(text);
    }
    bail!("no comment text given; pass --text, --text-file, or set {COMMENT_BODY_ENV}")
}

fn cmd_fetch_issue(args: &FetchIssueArgs) -> Result<i32> {
    let config = optional_config(args.config.as_deref())?;
    let repo = require_repo(args.repo.as_deref())?;
    let policy = resolve_retry_policy(None, None)?;

    let bundle = github::fetch_issue(&repo, args.number, policy)?;

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_dir(&config));
    let bundle_dir = output_dir.join(&bundle.run_id);
    mkdirp(&bundle_dir)?;

    let json_path = bundle_dir.join(format!("issue-{}.json", args.number));
    write_json(&json_path, &serde_json::to_value(&bundle)?)?;
    let manifest_path = bundle_dir.join(format!("issue-{}.md", args.number));
    fs::write(&manifest_path, github::generate_manifest(&bundle))
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    println!("Bundle: {}", json_path.display());
    println!("Manifest: {}", manifest_path.display());
    if args.json {
        print_json(&serde_json::to_value(&bundle)?)?;
    }
    Ok(0)
}

fn cmd_issues(args: &IssuesArgs) -> Result<i32> {
    if !matches!(args.state.as_str(), "open" | "closed" | "all") {
        bail!("--state must be open, closed, or all; got: {}", args.state);
    }
    if args.limit == 0 {
        bail!("--limit must be >= 1");
    }
    let repo = require_repo(args.repo.as_deref())?;
    let policy = resolve_retry_policy(None, None)?;

    let listing = github::search_issues(
        &repo,
        args.label.as_deref(),
        &args.state,
        args.limit,
        policy,
    )?;

    if args.json {
        print_json(&Value::Array(listing))?;
        return Ok(0);
    }
    if listing.is_empty() {
        println!("No matching issues.");
        return Ok(0);
    }
    for row in &listing {
        let number = row.get("number").and_then(Value::as_u64).unwrap_or(0);
        let state = row.get("state").and_then(Value::as_str).unwrap_or("unknown");
        let title = row.get("title").and_then(Value::as_str).unwrap_or("untitled");
        println!("- #{number:<6} {state:<8} {title}");
    }
    Ok(0)
}

fn cmd_stats(args: &StatsArgs) -> Result<i32> {
    let config = optional_config(args.config.as_deref())?;
    let repo = require_repo(args.repo.as_deref())?;
    let policy = resolve_retry_policy(None, None)?;

    let report = github::collect_stats(&repo, policy)?;

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_dir(&config));
    let stats_path = output_dir.join("stats.json");
    write_json(&stats_path, &serde_json::to_value(&report)?)?;

    print_stats_summary(&report);
    println!("\nStatistics saved to: {}", stats_path.display());
    if args.json {
        print_json(&serde_json::to_value(&report)?)?;
    }
    Ok(0)
}

fn print_stats_summary(report: &StatsReport) {
    println!("\n=== Issue Statistics ===");
    println!("Open Issues: {}", report.open_issues.total);
    println!("  Critical: {}", report.open_issues.by_priority.critical);
    println!("  High: {}", report.open_issues.by_priority.high);
    println!("  Medium: {}", report.open_issues.by_priority.medium);
    println!("  Low: {}", report.open_issues.by_priority.low);
    println!(
        "  Unprioritized: {}",
        report.open_issues.by_priority.unprioritized
    );
    println!("\nClosed Last 7 Days: {}", report.closed_last_7_days.total);
    if report.closed_last_7_days.average_time_to_close_hours > 0.0 {
        println!(
            "  Average Time to Close: {} hours",
            report.closed_last_7_days.average_time_to_close_hours
        );
    }
}

fn cmd_render_prompt(args: &RenderPromptArgs) -> Result<i32> {
    let template = fs::read_to_string(&args.template)
        .with_context(|| format!("failed reading {}", args.template.display()))?;

    let mut vars = match &args.vars_file {
        Some(path) => prompt::vars_from_file(path)?,
        None => Default::default(),
    };
    for raw in &args.vars {
        let (key, value) = parse_key_value(raw)?;
        vars.insert(key, value);
    }

    let rendered = prompt::render(&template, &vars)?;
    match &args.out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                mkdirp(parent)?;
            }
            fs::write(path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Prompt written to: {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(0)
}

fn cmd_label(args: &LabelArgs) -> Result<i32> {
    if args.add.is_empty() && args.remove.is_empty() {
        bail!("nothing to do; pass --add and/or --remove");
    }
    let repo = require_repo(args.repo.as_deref())?;
    let policy = resolve_retry_policy(None, None)?;
    github::edit_labels(&repo, args.number, &args.add, &args.remove, policy)?;
    println!(
        "Updated labels on {repo}#{}: +{} -{}",
        args.number,
        args.add.len(),
        args.remove.len()
    );
    Ok(0)
}

fn cmd_dispatch(args: &DispatchArgs) -> Result<i32> {
    let repo = require_repo(args.repo.as_deref())?;
    let policy = resolve_retry_policy(None, None)?;
    let mut fields = Vec::new();
    for raw in &args.fields {
        fields.push(parse_key_value(raw)?);
    }
    github::dispatch_workflow(&repo, &args.workflow, args.git_ref.as_deref(), &fields, policy)?;
    println!("Dispatched workflow {} on {repo}", args.workflow);
    Ok(0)
}

fn cmd_create_issue(args: &CreateIssueArgs) -> Result<i32> {
    let repo = require_repo(args.repo.as_deref())?;
    let policy = resolve_retry_policy(None, None)?;
    let body = match (&args.body, &args.body_file) {
        (Some(_), Some(_)) => bail!("pass either --body or --body-file, not both"),
        (Some(body), None) => body.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        (None, None) => bail!("pass --body or --body-file"),
    };
    let url = github::create_issue(&repo, &args.title, &body, &args.labels, policy)?;
    println!("Created issue: {url}");
    Ok(0)
}

fn optional_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}
