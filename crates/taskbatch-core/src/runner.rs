use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::debug;

use crate::classify::is_list_style;
use crate::parser::ParsedCommand;
use crate::scratch::ScratchDir;

pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;
pub const LIST_OUTPUT_LIMIT: usize = 8 * 1024 * 1024;
/// List-style output may be this many times the size of the task data file.
const DATA_FILE_FACTOR: u64 = 4;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("task program not found: {program} ({source})")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spool command output: {0}")]
    Io(#[from] io::Error),
}

/// Output buffer ceilings, by kind of command.
#[derive(Debug, Clone)]
pub struct OutputLimits {
    pub default_bytes: usize,
    pub list_bytes: usize,
    pub data_file: Option<PathBuf>,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            default_bytes: DEFAULT_OUTPUT_LIMIT,
            list_bytes: LIST_OUTPUT_LIMIT,
            data_file: None,
        }
    }
}

impl OutputLimits {
    pub fn ceiling_for(&self, command: &ParsedCommand) -> usize {
        if !command.classification.is_cacheable() || !is_list_style(&command.name) {
            return self.default_bytes;
        }
        let data_len = self
            .data_file
            .as_ref()
            .and_then(|path| fs::metadata(path).ok())
            .map(|meta| meta.len().saturating_mul(DATA_FILE_FACTOR))
            .unwrap_or(0);
        let data_len = usize::try_from(data_len).unwrap_or(usize::MAX);
        self.list_bytes.max(data_len)
    }
}

/// One call of the task program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub output_limit: usize,
}

impl Invocation {
    pub fn for_command(
        command: &ParsedCommand,
        non_interactive_flag: &str,
        limits: &OutputLimits,
    ) -> Self {
        let mut args = Vec::with_capacity(command.positional_args.len() + command.flags.len() + 2);
        args.push(command.name.clone());
        args.extend(command.positional_args.iter().cloned());
        args.extend(command.flags.iter().cloned());
        if !non_interactive_flag.is_empty() && !command.has_flag(non_interactive_flag) {
            args.push(non_interactive_flag.to_string());
        }
        Self {
            args,
            output_limit: limits.ceiling_for(command),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

/// The external task CLI: run one sub-command to completion.
pub trait TaskRunner: Sync {
    fn run(&self, invocation: &Invocation) -> Result<RunOutput, RunnerError>;
}

/// Runs the task program as a child process, spooling its output through
/// the scratch directory.
#[derive(Debug)]
pub struct ProcessRunner {
    program: PathBuf,
    scratch: ScratchDir,
    sequence: AtomicU64,
}

impl ProcessRunner {
    pub fn new(program: &str) -> Result<Self, RunnerError> {
        let resolved = which::which(program).map_err(|source| RunnerError::NotFound {
            program: program.to_string(),
            source,
        })?;
        debug!(program = %resolved.display(), "resolved task program");
        Ok(Self {
            program: resolved,
            scratch: ScratchDir::create()?,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn close(self) {
        self.scratch.close();
    }

    fn spool(&self, invocation: &Invocation) -> Result<RunOutput, RunnerError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let out_path = self.scratch.file(&format!("{id}.out"));
        let err_path = self.scratch.file(&format!("{id}.err"));

        let status = Command::new(&self.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(File::create(&out_path)?)
            .stderr(File::create(&err_path)?)
            .status()
            .map_err(|source| RunnerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let (stdout, out_truncated) = read_bounded(&out_path, invocation.output_limit)?;
        let (stderr, err_truncated) = read_bounded(&err_path, invocation.output_limit)?;
        for path in [&out_path, &err_path] {
            if let Err(err) = fs::remove_file(path) {
                debug!(path = %path.display(), "failed to remove spool file: {err}");
            }
        }

        Ok(RunOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            truncated: out_truncated || err_truncated,
        })
    }
}

impl TaskRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<RunOutput, RunnerError> {
        debug!(args = ?invocation.args, "spawning task program");
        self.spool(invocation)
    }
}

fn read_bounded(path: &Path, limit: usize) -> io::Result<(String, bool)> {
    let mut buf = Vec::new();
    File::open(path)?
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut buf)?;
    let truncated = buf.len() > limit;
    if truncated {
        buf.truncate(limit);
    }
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}
