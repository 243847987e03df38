use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use is_terminal::IsTerminal;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use taskbatch_core::config::{resolve_config, BatchConfig};
use taskbatch_core::failure::{
    AbortOnFailure, ContinueOnFailure, DecisionProvider, FailurePolicy, TerminalPrompt,
};
use taskbatch_core::group::{CommandGroup, Dispatch};
use taskbatch_core::parser::{parse_lines, read_batch_lines, RawLine};
use taskbatch_core::runner::ProcessRunner;
use taskbatch_core::session::BatchSession;

#[derive(Parser)]
#[command(
    name = "taskbatch",
    version,
    about = "Run a batch of task CLI sub-commands with read caching"
)]
struct Cli {
    /// Batch file with one sub-command per line
    file: Option<PathBuf>,
    /// Read sub-commands from standard input until end of input
    #[arg(long, conflicts_with = "file")]
    stdin: bool,
    /// Task CLI executable to drive
    #[arg(long)]
    program: Option<String>,
    /// Worker threads for runs of read commands
    #[arg(long)]
    concurrency: Option<usize>,
    /// What to do when a command fails: prompt, abort or continue
    #[arg(long)]
    on_failure: Option<FailurePolicy>,
    /// Task data file used to size output buffers for list-style reads
    #[arg(long)]
    data_file: Option<PathBuf>,
    /// Show how the batch would be grouped without running anything
    #[arg(long)]
    dry_run: bool,
    /// Print the summary (or plan) as JSON
    #[arg(long)]
    json: bool,
    /// Config file to use instead of the nearest .taskbatch.toml
    #[arg(long)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = std::env::current_dir().context("resolve working directory")?;
    let mut config = resolve_config(&cwd, cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.validate()?;
    tracing::debug!(?config, "resolved configuration");

    let lines = read_input(&cli)?;
    let commands = parse_lines(&lines);
    let mut session = BatchSession::new(config.clone());

    if cli.dry_run {
        let groups = session.plan(commands);
        print_plan(&groups, session.workers(), cli.json)?;
        return Ok(());
    }

    let runner = ProcessRunner::new(&config.program)
        .with_context(|| format!("cannot run task program '{}'", config.program))?;
    let mut decider = decision_provider(config.on_failure);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let report = session.run(commands, &runner, decider.as_mut(), &mut out)?;
    runner.close();

    let summary = report.summary(config.overhead_cost);
    if cli.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
    } else {
        writeln!(out)?;
        writeln!(out, "{}", summary.render())?;
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("TASKBATCH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn apply_overrides(config: &mut BatchConfig, cli: &Cli) {
    if let Some(program) = cli.program.as_ref() {
        config.program = program.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(policy) = cli.on_failure {
        config.on_failure = policy;
    }
    if let Some(data_file) = cli.data_file.as_ref() {
        config.data_file = Some(data_file.clone());
    }
}

fn read_input(cli: &Cli) -> Result<Vec<RawLine>> {
    if cli.stdin {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            eprintln!("Enter commands, one per line; finish with end-of-input (Ctrl-D).");
        }
        return read_batch_lines(stdin.lock()).context("read commands from stdin");
    }
    let Some(path) = cli.file.as_ref() else {
        bail!("provide a batch file or --stdin");
    };
    let file = File::open(path).with_context(|| format!("open batch file {}", path.display()))?;
    read_batch_lines(BufReader::new(file))
        .with_context(|| format!("read batch file {}", path.display()))
}

fn decision_provider(policy: FailurePolicy) -> Box<dyn DecisionProvider> {
    match policy {
        FailurePolicy::Abort => Box::new(AbortOnFailure),
        FailurePolicy::Continue => Box::new(ContinueOnFailure),
        FailurePolicy::Prompt if io::stdin().is_terminal() => {
            Box::new(TerminalPrompt::new(io::stdin().lock(), io::stderr()))
        }
        FailurePolicy::Prompt => Box::new(AbortOnFailure),
    }
}

fn print_plan(groups: &[CommandGroup], workers: usize, as_json: bool) -> Result<()> {
    if as_json {
        let value: Vec<_> = groups
            .iter()
            .map(|group| {
                json!({
                    "classification": group.classification,
                    "dispatch": dispatch_label(group.dispatch(workers)),
                    "commands": group
                        .commands
                        .iter()
                        .map(|cmd| json!({
                            "line": cmd.line,
                            "command": cmd.display(),
                            "cacheable": cmd.classification.is_cacheable(),
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (index, group) in groups.iter().enumerate() {
        println!(
            "group {}: {} x{} ({})",
            index + 1,
            group.classification,
            group.len(),
            dispatch_label(group.dispatch(workers))
        );
        for cmd in &group.commands {
            let note = if cmd.classification.is_cacheable() {
                "  [cacheable]"
            } else {
                ""
            };
            println!("  [line {}] {}{}", cmd.line, cmd.display(), note);
        }
    }
    Ok(())
}

fn dispatch_label(dispatch: Dispatch) -> String {
    match dispatch {
        Dispatch::Serial => "serial".to_string(),
        Dispatch::Parallel(workers) => format!("parallel x{workers}"),
    }
}
