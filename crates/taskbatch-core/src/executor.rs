use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use crate::parser::ParsedCommand;
use crate::runner::{Invocation, RunnerError, TaskRunner};

/// Upper bound on concurrent Read dispatch, whatever the host offers.
pub const MAX_WORKERS: usize = 4;

/// Exit code reported when the task program could not be started.
pub const SPAWN_FAILURE_EXIT: i32 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command: ParsedCommand,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub from_cache: bool,
    pub duration_ms: u64,
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn cached(command: ParsedCommand, output: String) -> Self {
        Self {
            command,
            exit_code: 0,
            stdout: output,
            stderr: String::new(),
            from_cache: true,
            duration_ms: 0,
            truncated: false,
        }
    }

    pub fn failed(command: ParsedCommand, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            command,
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            from_cache: false,
            duration_ms: 0,
            truncated: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Worker count for parallel Read groups: the configured degree, capped by
/// host parallelism and `MAX_WORKERS`.
pub fn effective_workers(configured: usize) -> usize {
    let host = thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    configured.max(1).min(host).min(MAX_WORKERS)
}

/// Run one command through the task program. Runner errors become a failed
/// result rather than escaping.
pub fn execute_command<R>(
    runner: &R,
    command: &ParsedCommand,
    invocation: &Invocation,
) -> ExecutionResult
where
    R: TaskRunner + ?Sized,
{
    let started = Instant::now();
    let outcome = runner.run(invocation);
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(output) => {
            if output.truncated {
                warn!(
                    line = command.line,
                    limit = invocation.output_limit,
                    "command output exceeded its buffer ceiling and was truncated"
                );
            }
            ExecutionResult {
                command: command.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                from_cache: false,
                duration_ms,
                truncated: output.truncated,
            }
        }
        Err(err) => {
            let exit_code = match err {
                RunnerError::Spawn { .. } | RunnerError::NotFound { .. } => SPAWN_FAILURE_EXIT,
                RunnerError::Io(_) => 1,
            };
            let mut result = ExecutionResult::failed(command.clone(), exit_code, format!("{err}\n"));
            result.duration_ms = duration_ms;
            result
        }
    }
}

/// A queued dispatch: position within its group plus what to run.
pub struct Job<'a> {
    pub offset: usize,
    pub command: &'a ParsedCommand,
    pub invocation: Invocation,
}

/// Run jobs on up to `workers` threads. Results come back in completion
/// order, tagged with their offset; the caller restores submission order.
pub fn execute_parallel<R>(
    runner: &R,
    jobs: Vec<Job<'_>>,
    workers: usize,
) -> Vec<(usize, ExecutionResult)>
where
    R: TaskRunner + ?Sized,
{
    let workers = workers.max(1).min(jobs.len());
    if workers == 0 {
        return Vec::new();
    }
    debug!(jobs = jobs.len(), workers, "dispatching read group in parallel");

    let queue = Mutex::new(jobs.into_iter());
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .next();
                let Some(job) = next else {
                    break;
                };
                let result = execute_command(runner, job.command, &job.invocation);
                if tx.send((job.offset, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);
    rx.into_iter().collect()
}
