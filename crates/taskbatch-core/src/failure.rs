use std::collections::VecDeque;
use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::executor::ExecutionResult;

pub const CONTINUE_PROMPT: &str = "Continue batch processing? (y/n) ";

/// Decides whether the batch goes on after a failed command.
pub trait DecisionProvider {
    fn should_continue(&mut self, failed: &ExecutionResult) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Ask on a terminal, abort when unattended.
    #[default]
    Prompt,
    Abort,
    Continue,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Prompt => "prompt",
            FailurePolicy::Abort => "abort",
            FailurePolicy::Continue => "continue",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(FailurePolicy::Prompt),
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!(
                "unknown failure policy '{other}' (expected prompt, abort or continue)"
            )),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFailure;

impl DecisionProvider for AbortOnFailure {
    fn should_continue(&mut self, _failed: &ExecutionResult) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContinueOnFailure;

impl DecisionProvider for ContinueOnFailure {
    fn should_continue(&mut self, _failed: &ExecutionResult) -> bool {
        true
    }
}

/// Fixed answers, consumed in order. Runs out to "abort".
#[derive(Debug, Default, Clone)]
pub struct ScriptedDecisions {
    answers: VecDeque<bool>,
    asked: usize,
}

impl ScriptedDecisions {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: 0,
        }
    }

    pub fn asked(&self) -> usize {
        self.asked
    }
}

impl DecisionProvider for ScriptedDecisions {
    fn should_continue(&mut self, _failed: &ExecutionResult) -> bool {
        self.asked += 1;
        self.answers.pop_front().unwrap_or(false)
    }
}

/// Asks the user on an interactive terminal.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> DecisionProvider for TerminalPrompt<R, W> {
    fn should_continue(&mut self, _failed: &ExecutionResult) -> bool {
        if let Err(err) = write!(self.output, "{CONTINUE_PROMPT}").and_then(|_| self.output.flush())
        {
            warn!("failed to write prompt: {err}");
            return false;
        }
        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(0) => false,
            Ok(_) => is_affirmative(&answer),
            Err(err) => {
                warn!("failed to read answer: {err}");
                false
            }
        }
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
