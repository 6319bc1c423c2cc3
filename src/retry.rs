use anyhow::{Result, bail};
use std::thread;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: u64 = 2;

/// Bounded-retry policy: up to `max_attempts` tries, sleeping
/// `backoff_base ^ attempt` seconds after the attempt-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("retry policy max_attempts must be >= 1");
        }
        if self.backoff_base == 0 {
            bail!("retry policy backoff_base must be >= 1");
        }
        Ok(())
    }
}

/// Outcome of a retried command. Exhausting the policy is a normal return,
/// not an error; `exit_code` is the last status observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    pub succeeded: bool,
    pub exit_code: i32,
    pub attempts_used: u32,
}

/// Run `attempt` (which maps an attempt number, starting at 1, to an exit
/// status) until it returns 0 or the policy is exhausted, blocking on
/// `thread::sleep` between failures.
pub fn execute<F>(attempt: F, policy: RetryPolicy) -> Result<CommandResult>
where
    F: FnMut(u32) -> Result<i32>,
{
    execute_with(attempt, policy, thread::sleep)
}

/// Same as [`execute`], with the sleep injected. An `Err` from `attempt`
/// (e.g. the binary could not be spawned) aborts immediately: only a
/// non-zero exit status counts as a retryable failure.
pub fn execute_with<F, S>(mut attempt: F, policy: RetryPolicy, mut sleep: S) -> Result<CommandResult>
where
    F: FnMut(u32) -> Result<i32>,
    S: FnMut(Duration),
{
    policy.validate()?;

    let mut last_code = 0;
    for attempt_no in 1..=policy.max_attempts {
        let code = attempt(attempt_no)?;
        if code == 0 {
            return Ok(CommandResult {
                succeeded: true,
                exit_code: 0,
                attempts_used: attempt_no,
            });
        }
        last_code = code;
        if attempt_no < policy.max_attempts {
            sleep(Duration::from_secs(backoff_secs(policy, attempt_no)));
        }
    }

    Ok(CommandResult {
        succeeded: false,
        exit_code: last_code,
        attempts_used: policy.max_attempts,
    })
}

pub fn backoff_secs(policy: RetryPolicy, attempt_no: u32) -> u64 {
    policy.backoff_base.saturating_pow(attempt_no)
}
