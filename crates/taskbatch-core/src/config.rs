use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::failure::FailurePolicy;
use crate::group::DEFAULT_GROUP_THRESHOLD;
use crate::runner::OutputLimits;
use crate::stats::DEFAULT_OVERHEAD_COST;

pub const DEFAULT_PROGRAM: &str = "tasks";
pub const DEFAULT_NON_INTERACTIVE_FLAG: &str = "--non-interactive";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// On-disk shape of `.taskbatch.toml`; every field optional so project and
/// global files can be layered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Task CLI executable, by name on PATH or by path.
    pub program: Option<String>,
    pub non_interactive_flag: Option<String>,
    /// Worker threads for contiguous read runs; 1 keeps dispatch serial.
    pub concurrency: Option<usize>,
    pub group_threshold: Option<usize>,
    /// Estimated cost of one task CLI invocation.
    pub overhead_cost: Option<f64>,
    pub on_failure: Option<FailurePolicy>,
    /// Task data file; list-style output ceilings scale with its size.
    pub data_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub program: String,
    pub non_interactive_flag: String,
    pub concurrency: usize,
    pub group_threshold: usize,
    pub overhead_cost: f64,
    pub on_failure: FailurePolicy,
    pub data_file: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            non_interactive_flag: DEFAULT_NON_INTERACTIVE_FLAG.to_string(),
            concurrency: 1,
            group_threshold: DEFAULT_GROUP_THRESHOLD,
            overhead_cost: DEFAULT_OVERHEAD_COST,
            on_failure: FailurePolicy::default(),
            data_file: None,
        }
    }
}

impl BatchConfig {
    /// Overlay the fields set in `file`. Relative data file paths resolve
    /// against `base`, the directory holding the config file.
    pub fn apply(&mut self, file: &ConfigFile, base: Option<&Path>) {
        if let Some(program) = non_empty(file.program.as_deref()) {
            self.program = program.to_string();
        }
        if let Some(flag) = file.non_interactive_flag.as_ref() {
            self.non_interactive_flag = flag.trim().to_string();
        }
        if let Some(concurrency) = file.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(threshold) = file.group_threshold {
            self.group_threshold = threshold;
        }
        if let Some(cost) = file.overhead_cost {
            self.overhead_cost = cost;
        }
        if let Some(policy) = file.on_failure {
            self.on_failure = policy;
        }
        if let Some(data_file) = non_empty(file.data_file.as_deref()) {
            let path = PathBuf::from(data_file);
            self.data_file = Some(match base {
                Some(base) if path.is_relative() => base.join(path),
                _ => path,
            });
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::Invalid("program must not be empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !self.overhead_cost.is_finite() || self.overhead_cost < 0.0 {
            return Err(ConfigError::Invalid(
                "overhead_cost must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn output_limits(&self) -> OutputLimits {
        OutputLimits {
            data_file: self.data_file.clone(),
            ..OutputLimits::default()
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".taskbatch.toml", ".taskbatchrc"]
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_taskbatch_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("TASKBATCH_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".taskbatch"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_taskbatch_home_dir().map(|home| home.join("config.toml"))
}

/// Nearest project config file at or above `start`.
pub fn find_project_config(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    for candidate in start.ancestors() {
        for name in config_filename_candidates() {
            let path = candidate.join(name);
            if path.is_file() {
                return Some(path);
            }
        }
    }
    None
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<ConfigFile>(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Built-in defaults, then the global file, then the project file (or
/// `explicit` in its place). Unset fields fall through.
pub fn resolve_config(start: &Path, explicit: Option<&Path>) -> Result<BatchConfig, ConfigError> {
    let mut config = BatchConfig::default();

    if let Some(path) = global_config_path().filter(|path| path.is_file()) {
        debug!(path = %path.display(), "loading global config");
        let file = load_config_file(&path)?;
        config.apply(&file, path.parent());
    }

    let project = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_project_config(start),
    };
    if let Some(path) = project {
        debug!(path = %path.display(), "loading project config");
        let file = load_config_file(&path)?;
        config.apply(&file, path.parent());
    }

    config.validate()?;
    Ok(config)
}
