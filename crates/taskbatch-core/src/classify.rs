use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;

/// Whether a sub-command can mutate the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Read,
    Write,
    Other,
}

impl Classification {
    pub fn is_cacheable(self) -> bool {
        matches!(self, Classification::Read)
    }

    pub fn is_parallelizable(self) -> bool {
        matches!(self, Classification::Read)
    }

    pub fn label(self) -> &'static str {
        match self {
            Classification::Read => "read",
            Classification::Write => "write",
            Classification::Other => "other",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const READ_COMMANDS: &[&str] = &[
    "list", "ls", "show", "view", "status", "stats", "search", "find", "export", "report", "next",
    "ready", "summary", "info",
];

const WRITE_COMMANDS: &[&str] = &[
    "add", "quick", "create", "new", "update", "edit", "set", "done", "complete", "close",
    "reopen", "start", "stop", "delete", "remove", "rm", "archive", "tag", "untag", "assign",
    "move", "note", "import", "undo",
];

/// Reads whose output grows with the size of the task store.
const LIST_STYLE_COMMANDS: &[&str] = &["list", "ls", "export", "search", "report"];

static TABLE: Lazy<HashMap<&'static str, Classification>> = Lazy::new(|| {
    let mut table = HashMap::with_capacity(READ_COMMANDS.len() + WRITE_COMMANDS.len());
    for name in READ_COMMANDS {
        table.insert(*name, Classification::Read);
    }
    for name in WRITE_COMMANDS {
        table.insert(*name, Classification::Write);
    }
    table
});

pub fn classify(name: &str) -> Classification {
    TABLE.get(name).copied().unwrap_or(Classification::Other)
}

pub fn is_list_style(name: &str) -> bool {
    LIST_STYLE_COMMANDS.contains(&name)
}
