//! Batch session: drives one run over a parsed batch with its own cache
//! and statistics.

use std::collections::HashSet;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::classify::Classification;
use crate::config::BatchConfig;
use crate::executor::{
    effective_workers, execute_command, execute_parallel, ExecutionResult, Job, MAX_WORKERS,
};
use crate::failure::DecisionProvider;
use crate::group::{group_commands, CommandGroup, Dispatch};
use crate::output::{indent, render_console, write_redirect};
use crate::parser::ParsedCommand;
use crate::runner::{Invocation, OutputLimits, TaskRunner};
use crate::state::CommandState;
use crate::stats::{BatchSummary, SessionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<ExecutionResult>,
    pub states: Vec<CommandState>,
    pub stats: SessionStats,
    pub aborted: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn summary(&self, overhead_cost: f64) -> BatchSummary {
        BatchSummary::from_stats(&self.stats, self.elapsed, overhead_cost, self.aborted)
    }
}

pub struct BatchSession {
    config: BatchConfig,
    limits: OutputLimits,
    workers: usize,
    cache: ResultCache,
    stats: SessionStats,
    states: Vec<CommandState>,
}

impl BatchSession {
    pub fn new(config: BatchConfig) -> Self {
        let limits = config.output_limits();
        let workers = effective_workers(config.concurrency);
        Self {
            config,
            limits,
            workers,
            cache: ResultCache::new(),
            stats: SessionStats::default(),
            states: Vec::new(),
        }
    }

    /// Pin the read worker count, ignoring host parallelism. Still bounded
    /// by `MAX_WORKERS`.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Group the batch the way `run` would, without executing anything.
    pub fn plan(&self, commands: Vec<ParsedCommand>) -> Vec<CommandGroup> {
        group_commands(commands, self.config.group_threshold)
    }

    pub fn run<R, D, W>(
        &mut self,
        commands: Vec<ParsedCommand>,
        runner: &R,
        decider: &mut D,
        out: &mut W,
    ) -> io::Result<BatchReport>
    where
        R: TaskRunner + ?Sized,
        D: DecisionProvider + ?Sized,
        W: Write + ?Sized,
    {
        let started = Instant::now();
        self.stats = SessionStats {
            commands_submitted: commands.len(),
            ..SessionStats::default()
        };
        self.states = vec![CommandState::Pending; commands.len()];
        let groups = self.plan(commands);
        debug!(
            groups = groups.len(),
            workers = self.workers,
            "starting batch session"
        );

        let mut results = Vec::with_capacity(self.states.len());
        let mut aborted = false;
        for group in &groups {
            let flow = match group.dispatch(self.workers) {
                Dispatch::Serial => self.run_serial(group, runner, decider, out, &mut results)?,
                Dispatch::Parallel(workers) => {
                    self.run_parallel(group, workers, runner, decider, out, &mut results)?
                }
            };
            if flow == Flow::Abort {
                aborted = true;
                break;
            }
        }

        self.cache.invalidate_all();
        let report = BatchReport {
            results,
            states: std::mem::take(&mut self.states),
            stats: self.stats.clone(),
            aborted,
            elapsed: started.elapsed(),
        };
        info!(
            executed = report.stats.commands_run,
            cache_hits = report.stats.cache_hits,
            failures = report.stats.failures,
            aborted,
            "batch session finished"
        );
        Ok(report)
    }

    fn run_serial<R, D, W>(
        &mut self,
        group: &CommandGroup,
        runner: &R,
        decider: &mut D,
        out: &mut W,
        results: &mut Vec<ExecutionResult>,
    ) -> io::Result<Flow>
    where
        R: TaskRunner + ?Sized,
        D: DecisionProvider + ?Sized,
        W: Write + ?Sized,
    {
        for (offset, command) in group.commands.iter().enumerate() {
            let index = group.start + offset;
            let result = match self.serve_from_cache(index, command) {
                Some(hit) => hit,
                None => self.execute_now(index, command, runner),
            };
            if self.integrate(index, result, decider, out, results)? == Flow::Abort {
                return Ok(Flow::Abort);
            }
        }
        Ok(Flow::Continue)
    }

    /// Dispatch a Read run on worker threads, then integrate the buffered
    /// results in submission order. Repeats of a read inside the run are
    /// dispatched once and picked up from the cache when flushed.
    fn run_parallel<R, D, W>(
        &mut self,
        group: &CommandGroup,
        workers: usize,
        runner: &R,
        decider: &mut D,
        out: &mut W,
        results: &mut Vec<ExecutionResult>,
    ) -> io::Result<Flow>
    where
        R: TaskRunner + ?Sized,
        D: DecisionProvider + ?Sized,
        W: Write + ?Sized,
    {
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for (offset, command) in group.commands.iter().enumerate() {
            let key = CacheKey::for_command(command);
            let already_cached = key
                .as_ref()
                .map(|key| self.cache.lookup(key).is_some())
                .unwrap_or(false);
            let first_in_group = key
                .as_ref()
                .map(|key| seen.insert(key.digest().to_string()))
                .unwrap_or(true);
            if already_cached || !first_in_group {
                continue;
            }
            self.transition(group.start + offset, CommandState::Executing);
            jobs.push(Job {
                offset,
                command,
                invocation: self.invocation(command),
            });
        }

        let mut buffered: Vec<Option<ExecutionResult>> = vec![None; group.len()];
        for (offset, result) in execute_parallel(runner, jobs, workers) {
            buffered[offset] = Some(result);
        }

        for (offset, command) in group.commands.iter().enumerate() {
            let index = group.start + offset;
            let result = match buffered[offset].take() {
                Some(result) => result,
                None => match self.serve_from_cache(index, command) {
                    Some(hit) => hit,
                    None => self.execute_now(index, command, runner),
                },
            };
            if self.integrate(index, result, decider, out, results)? == Flow::Abort {
                self.settle_unflushed(group, &mut buffered, results);
                return Ok(Flow::Abort);
            }
        }
        Ok(Flow::Continue)
    }

    /// Reads that already ran past an abort point are counted and given a
    /// final state, but neither printed nor cached.
    fn settle_unflushed(
        &mut self,
        group: &CommandGroup,
        buffered: &mut [Option<ExecutionResult>],
        results: &mut Vec<ExecutionResult>,
    ) {
        let mut settled = 0;
        for (offset, slot) in buffered.iter_mut().enumerate() {
            let Some(result) = slot.take() else {
                continue;
            };
            self.stats.record(&result);
            self.transition(
                group.start + offset,
                if result.succeeded() {
                    CommandState::Succeeded
                } else {
                    CommandState::Failed
                },
            );
            results.push(result);
            settled += 1;
        }
        if settled > 0 {
            debug!(settled, "counted read results that finished past the abort");
        }
    }

    fn invocation(&self, command: &ParsedCommand) -> Invocation {
        Invocation::for_command(command, &self.config.non_interactive_flag, &self.limits)
    }

    fn serve_from_cache(&mut self, index: usize, command: &ParsedCommand) -> Option<ExecutionResult> {
        let key = CacheKey::for_command(command)?;
        let output = self.cache.lookup(&key)?;
        self.transition(index, CommandState::CacheHit);
        Some(ExecutionResult::cached(command.clone(), output))
    }

    fn execute_now<R>(&mut self, index: usize, command: &ParsedCommand, runner: &R) -> ExecutionResult
    where
        R: TaskRunner + ?Sized,
    {
        self.transition(index, CommandState::Executing);
        execute_command(runner, command, &self.invocation(command))
    }

    /// Fold one finished command into cache, stats and console output, and
    /// consult the decider if it failed.
    fn integrate<D, W>(
        &mut self,
        index: usize,
        result: ExecutionResult,
        decider: &mut D,
        out: &mut W,
        results: &mut Vec<ExecutionResult>,
    ) -> io::Result<Flow>
    where
        D: DecisionProvider + ?Sized,
        W: Write + ?Sized,
    {
        self.stats.record(&result);
        let command = &result.command;

        if !result.from_cache {
            self.transition(
                index,
                if result.succeeded() {
                    CommandState::Succeeded
                } else {
                    CommandState::Failed
                },
            );
            match command.classification {
                Classification::Write => {
                    self.cache.invalidate_all();
                    if result.succeeded() {
                        self.transition(index, CommandState::InvalidatingThenDone);
                    }
                }
                Classification::Read if result.succeeded() => {
                    if let Some(key) = CacheKey::for_command(command) {
                        self.cache.store(&key, result.stdout.clone());
                        self.transition(index, CommandState::Cached);
                    }
                }
                _ => {}
            }
        }

        let flow = if result.succeeded() {
            report_success(&result, out)?;
            Flow::Continue
        } else {
            report_failure(&result, out)?;
            out.flush()?;
            self.transition(index, CommandState::AwaitingDecision);
            if decider.should_continue(&result) {
                self.transition(index, CommandState::Failed);
                Flow::Continue
            } else {
                self.transition(index, CommandState::Aborted);
                info!(line = command.line, "batch aborted after failure");
                Flow::Abort
            }
        };
        results.push(result);
        Ok(flow)
    }

    fn transition(&mut self, index: usize, next: CommandState) {
        let Some(state) = self.states.get_mut(index) else {
            return;
        };
        let previous = *state;
        debug_assert!(
            previous.can_transition_to(next),
            "illegal transition {previous:?} -> {next:?}"
        );
        debug!(index, from = ?previous, to = ?next, "command state");
        *state = next;
    }
}

fn report_success<W: Write + ?Sized>(result: &ExecutionResult, out: &mut W) -> io::Result<()> {
    let command = &result.command;
    let suffix = if result.from_cache { " (cached)" } else { "" };
    writeln!(out, "✓ [line {}] {}{}", command.line, command.display(), suffix)?;

    if let Some(target) = command.redirect_target.as_ref() {
        if let Err(err) = write_redirect(target, &result.stdout) {
            warn!(path = %target.display(), "failed to write redirect target: {err}");
            writeln!(out, "  warning: could not write {}: {err}", target.display())?;
        }
        return Ok(());
    }

    let rendered = render_console(&result.stdout);
    if !rendered.is_empty() {
        writeln!(out, "{}", indent(&rendered, "  "))?;
    }
    Ok(())
}

fn report_failure<W: Write + ?Sized>(result: &ExecutionResult, out: &mut W) -> io::Result<()> {
    let command = &result.command;
    writeln!(
        out,
        "✗ [line {}] {} (exit {})",
        command.line,
        command.display(),
        result.exit_code
    )?;
    if !result.stderr.trim().is_empty() {
        writeln!(out, "{}", result.stderr.trim_end())?;
    }
    if !result.stdout.trim().is_empty() {
        writeln!(out, "{}", result.stdout.trim_end())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{AbortOnFailure, ContinueOnFailure};
    use crate::parser::{parse_line, RawLine};
    use crate::runner::{RunOutput, RunnerError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl TaskRunner for FakeRunner {
        fn run(&self, invocation: &Invocation) -> Result<RunOutput, RunnerError> {
            self.calls
                .lock()
                .expect("calls")
                .push(invocation.args.clone());
            let exit_code = if invocation.args[0] == "fail" { 1 } else { 0 };
            Ok(RunOutput {
                exit_code,
                stdout: format!("{}\n", invocation.args.join(" ")),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "boom\n".to_string()
                },
                truncated: false,
            })
        }
    }

    fn commands(lines: &[&str]) -> Vec<ParsedCommand> {
        lines
            .iter()
            .enumerate()
            .filter_map(|(index, text)| parse_line(&RawLine::new(index + 1, *text)))
            .collect()
    }

    #[test]
    fn write_clears_cache_and_forces_following_read_to_run() {
        let runner = FakeRunner::default();
        let mut session = BatchSession::new(BatchConfig::default());
        let mut out = Vec::new();
        let report = session
            .run(
                commands(&["show 1", "add x", "show 1"]),
                &runner,
                &mut AbortOnFailure,
                &mut out,
            )
            .expect("run");
        assert_eq!(runner.calls.lock().expect("calls").len(), 3);
        assert!(report.results.iter().all(|r| !r.from_cache));
        assert_eq!(
            report.states,
            vec![
                CommandState::Cached,
                CommandState::InvalidatingThenDone,
                CommandState::Cached,
            ]
        );
        assert!(session.cache().is_empty());
    }

    #[test]
    fn failed_write_still_invalidates() {
        let runner = FakeRunner::default();
        let mut config = BatchConfig::default();
        config.group_threshold = 10;
        let mut session = BatchSession::new(config);
        let mut cmds = commands(&["show 1", "fail now", "show 1"]);
        cmds[1].classification = Classification::Write;
        let report = session
            .run(cmds, &runner, &mut ContinueOnFailure, &mut io::sink())
            .expect("run");
        assert_eq!(runner.calls.lock().expect("calls").len(), 3);
        assert_eq!(report.states[1], CommandState::Failed);
        assert!(!report.results[2].from_cache);
    }

    #[test]
    fn other_commands_are_never_cached() {
        let runner = FakeRunner::default();
        let mut session = BatchSession::new(BatchConfig::default());
        let report = session
            .run(
                commands(&["plugin sync", "plugin sync"]),
                &runner,
                &mut AbortOnFailure,
                &mut io::sink(),
            )
            .expect("run");
        assert_eq!(report.stats.commands_run, 2);
        assert_eq!(report.states, vec![CommandState::Succeeded; 2]);
    }

    #[test]
    fn console_output_is_truncated_and_marked() {
        let runner = FakeRunner::default();
        let mut session = BatchSession::new(BatchConfig::default());
        let mut out = Vec::new();
        session
            .run(
                commands(&["show 'a\nb\nc\nd\ne\nf\ng'"]),
                &runner,
                &mut AbortOnFailure,
                &mut out,
            )
            .expect("run");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("✓ [line 1] show"));
        assert!(text.contains("... (2 lines omitted) ..."));
    }
}
