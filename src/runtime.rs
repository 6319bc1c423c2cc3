use anyhow::{Context, Result, bail};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::models::{CmdOutput, Config};
use crate::retry::{DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

pub const MAX_ATTEMPTS_ENV: &str = "GH_RETRY_MAX_ATTEMPTS";
pub const BACKOFF_BASE_ENV: &str = "GH_RETRY_BACKOFF_BASE";
pub const GH_BIN_ENV: &str = "WARDEN_GH_BIN";
pub const COMMENT_BODY_ENV: &str = "WARDEN_COMMENT_BODY";
pub const OUTPUT_FILE_ENV: &str = "GITHUB_OUTPUT";
pub const REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn create_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let mut rng = rand::rng();
    let mut suffix = String::new();
    for _ in 0..6 {
        suffix.push_str(&format!("{:x}", rng.random_range(0..16)));
    }
    format!("{stamp}-{suffix}")
}

/// Name of the gh executable; overridable so tests can substitute a stub.
pub fn gh_bin() -> String {
    std::env::var(GH_BIN_ENV).unwrap_or_else(|_| "gh".to_string())
}

pub fn comment_body_from_env() -> Option<String> {
    std::env::var(COMMENT_BODY_ENV).ok()
}

/// Repository to operate on: explicit flag first, CI environment second.
pub fn require_repo(flag: Option<&str>) -> Result<String> {
    if let Some(repo) = flag
        && !repo.trim().is_empty()
    {
        return Ok(repo.to_string());
    }
    if let Ok(repo) = std::env::var(REPOSITORY_ENV)
        && !repo.trim().is_empty()
    {
        return Ok(repo);
    }
    bail!("no repository given; pass --repo or set {REPOSITORY_ENV}")
}

/// Retry policy from the environment, with CLI flags taking precedence.
pub fn resolve_retry_policy(max_attempts: Option<u32>, backoff_base: Option<u64>) -> Result<RetryPolicy> {
    let env_attempts = std::env::var(MAX_ATTEMPTS_ENV).ok();
    let env_base = std::env::var(BACKOFF_BASE_ENV).ok();
    let policy = policy_from_values(
        max_attempts,
        backoff_base,
        env_attempts.as_deref(),
        env_base.as_deref(),
    )?;
    policy.validate()?;
    Ok(policy)
}

fn policy_from_values(
    flag_attempts: Option<u32>,
    flag_base: Option<u64>,
    env_attempts: Option<&str>,
    env_base: Option<&str>,
) -> Result<RetryPolicy> {
    let max_attempts = match (flag_attempts, env_attempts) {
        (Some(n), _) => n,
        (None, Some(raw)) => raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("invalid {MAX_ATTEMPTS_ENV}: {raw}"))?,
        (None, None) => DEFAULT_MAX_ATTEMPTS,
    };
    let backoff_base = match (flag_base, env_base) {
        (Some(b), _) => b,
        (None, Some(raw)) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {BACKOFF_BASE_ENV}: {raw}"))?,
        (None, None) => DEFAULT_BACKOFF_BASE,
    };
    Ok(RetryPolicy {
        max_attempts,
        backoff_base,
    })
}

pub fn run_cmd(
    cmd: Vec<String>,
    cwd: Option<&Path>,
    check: bool,
    env_map: Option<&HashMap<String, String>>,
) -> Result<CmdOutput> {
    if cmd.is_empty() {
        bail!("empty command");
    }
    let mut command = Command::new(&cmd[0]);
    command.args(&cmd[1..]);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    if let Some(map) = env_map {
        for (k, v) in map {
            command.env(k, v);
        }
    }
    let output = command
        .output()
        .with_context(|| format!("failed to run command: {}", cmd.join(" ")))?;
    let code = output.status.code().unwrap_or(1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if check && code != 0 {
        bail!(
            "command failed ({code}): {}\nstdout: {}\nstderr: {}",
            cmd.join(" "),
            stdout.trim(),
            stderr.trim()
        );
    }
    Ok(CmdOutput {
        code,
        stdout,
        stderr,
    })
}

/// Run with inherited stdio and report the exit status; used by the retry
/// wrapper so the wrapped command's output streams straight through.
pub fn run_status(cmd: &[String]) -> Result<i32> {
    if cmd.is_empty() {
        bail!("empty command");
    }
    let status = Command::new(&cmd[0])
        .args(&cmd[1..])
        .status()
        .with_context(|| format!("failed to run command: {}", cmd.join(" ")))?;
    Ok(status.code().unwrap_or(1))
}

pub fn mkdirp(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

pub fn write_json(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        mkdirp(parent)?;
    }
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Structured key=value sink: the CI output file when the runner provides
/// one, stdout otherwise.
pub fn emit_outputs(pairs: &[(String, String)]) -> Result<()> {
    let lines = format_output_lines(pairs)?;
    match std::env::var(OUTPUT_FILE_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open output file {path}"))?;
            file.write_all(lines.as_bytes())
                .with_context(|| format!("failed to write output file {path}"))?;
        }
        _ => print!("{lines}"),
    }
    Ok(())
}

fn format_output_lines(pairs: &[(String, String)]) -> Result<String> {
    let mut out = String::new();
    for (key, value) in pairs {
        if key.trim().is_empty() {
            bail!("output key cannot be empty");
        }
        if key.contains(['=', '\n']) || value.contains('\n') {
            bail!("output entry {key} contains a newline or '='");
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

pub fn parse_key_value(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("expected KEY=VALUE, got: {raw}"),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    let config = if path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_str(&text).context("invalid JSON config")?
    } else {
        serde_yaml::from_str(&text).context("invalid YAML config")?
    };
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(handle) = &config.handle {
        if handle.trim().is_empty() {
            bail!("config handle cannot be empty");
        }
        if handle.contains('@') || handle.chars().any(char::is_whitespace) {
            bail!("config handle must be a bare name without '@' or whitespace: {handle}");
        }
    }
    if let Some(tools) = &config.base_tools {
        for (idx, tool) in tools.iter().enumerate() {
            if tool.trim().is_empty() {
                bail!("config base_tools[{idx}] cannot be empty");
            }
        }
    }
    Ok(())
}

pub fn default_output_dir(config: &Config) -> PathBuf {
    config
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("issue-data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_apply_when_nothing_is_set() {
        let policy = policy_from_values(None, None, None, None).expect("policy");
        assert_eq!(policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.backoff_base, DEFAULT_BACKOFF_BASE);
    }

    #[test]
    fn policy_flags_override_environment() {
        let policy = policy_from_values(Some(5), Some(7), Some("9"), Some("9")).expect("policy");
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_base, 7);
    }

    #[test]
    fn policy_environment_values_are_parsed() {
        let policy = policy_from_values(None, None, Some("4"), Some("3")).expect("policy");
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff_base, 3);
    }

    #[test]
    fn policy_rejects_garbage_environment_values() {
        let err = policy_from_values(None, None, Some("many"), None).expect_err("expected error");
        assert!(err.to_string().contains(MAX_ATTEMPTS_ENV));
    }

    #[test]
    fn output_lines_are_key_equals_value() {
        let lines = format_output_lines(&[
            ("proceed".to_string(), "true".to_string()),
            ("tools".to_string(), "read,grep".to_string()),
        ])
        .expect("lines");
        assert_eq!(lines, "proceed=true\ntools=read,grep\n");
    }

    #[test]
    fn output_values_may_not_span_lines() {
        let err = format_output_lines(&[("body".to_string(), "a\nb".to_string())])
            .expect_err("expected error");
        assert!(err.to_string().contains("newline"));
    }

    #[test]
    fn key_value_parsing_requires_a_key() {
        assert!(parse_key_value("=value").is_err());
        assert!(parse_key_value("novalue").is_err());
        let (k, v) = parse_key_value("NAME=a=b").expect("pair");
        assert_eq!(k, "NAME");
        assert_eq!(v, "a=b");
    }

    #[test]
    fn config_rejects_decorated_handles() {
        let config = Config {
            handle: Some("@claude".to_string()),
            base_tools: None,
            output_dir: None,
        };
        let err = validate_config(&config).expect_err("expected rejection");
        assert!(err.to_string().contains("bare name"));
    }

    #[test]
    fn config_rejects_empty_base_tool_entries() {
        let config = Config {
            handle: None,
            base_tools: Some(vec!["read".to_string(), " ".to_string()]),
            output_dir: None,
        };
        assert!(validate_config(&config).is_err());
    }
}
