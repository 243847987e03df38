use crate::classify::Classification;
use crate::parser::ParsedCommand;

/// Batches at or below this size run one command at a time.
pub const DEFAULT_GROUP_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Serial,
    Parallel(usize),
}

/// A contiguous run of commands sharing one classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGroup {
    pub classification: Classification,
    /// Position of the first command in the flattened batch.
    pub start: usize,
    pub commands: Vec<ParsedCommand>,
}

impl CommandGroup {
    fn new(start: usize, command: ParsedCommand) -> Self {
        Self {
            classification: command.classification,
            start,
            commands: vec![command],
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn dispatch(&self, workers: usize) -> Dispatch {
        if self.classification.is_parallelizable() && self.len() > 1 && workers > 1 {
            Dispatch::Parallel(workers.min(self.len()))
        } else {
            Dispatch::Serial
        }
    }
}

/// Partition commands into maximal same-classification runs without
/// reordering anything. Batches no larger than `threshold` become singleton
/// groups.
pub fn group_commands(commands: Vec<ParsedCommand>, threshold: usize) -> Vec<CommandGroup> {
    let grouping = commands.len() > threshold;
    let mut groups: Vec<CommandGroup> = Vec::new();
    for (index, command) in commands.into_iter().enumerate() {
        match groups.last_mut() {
            Some(group) if grouping && group.classification == command.classification => {
                group.commands.push(command);
            }
            _ => groups.push(CommandGroup::new(index, command)),
        }
    }
    groups
}

pub fn flatten(groups: &[CommandGroup]) -> Vec<&ParsedCommand> {
    groups.iter().flat_map(|group| group.commands.iter()).collect()
}
