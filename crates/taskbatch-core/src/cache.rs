use std::collections::HashMap;

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::parser::ParsedCommand;

const FIELD_SEP: char = '\u{1f}';
const SECTION_SEP: char = '\u{1e}';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: String,
    fingerprint: String,
}

impl CacheKey {
    /// Key for a Read command; every other classification is uncacheable.
    pub fn for_command(command: &ParsedCommand) -> Option<Self> {
        if !command.classification.is_cacheable() {
            return None;
        }
        Some(Self::from_fingerprint(fingerprint(command)))
    }

    fn from_fingerprint(fingerprint: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self {
            digest,
            fingerprint,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Normalized command text: name, positional args in order, flags sorted.
/// The redirect target does not change what the command prints.
pub fn fingerprint(command: &ParsedCommand) -> String {
    let mut flags: Vec<&str> = command.flags.iter().map(String::as_str).collect();
    flags.sort_unstable();

    let mut text = command.name.clone();
    text.push(SECTION_SEP);
    for arg in &command.positional_args {
        text.push_str(arg);
        text.push(FIELD_SEP);
    }
    text.push(SECTION_SEP);
    for flag in flags {
        text.push_str(flag);
        text.push(FIELD_SEP);
    }
    text
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub fingerprint: String,
    pub output: String,
    pub created_at: DateTime<Local>,
}

/// Session-scoped store of Read outputs. Entries are only ever discarded
/// all at once.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored output, or `None` on a miss. An entry whose
    /// fingerprint disagrees with the key is dropped and reported as a miss.
    pub fn lookup(&mut self, key: &CacheKey) -> Option<String> {
        let entry = self.entries.get(&key.digest)?;
        if entry.fingerprint != key.fingerprint {
            warn!(
                key = %key.digest,
                "cache entry does not match its key, forcing a miss"
            );
            self.entries.remove(&key.digest);
            return None;
        }
        Some(entry.output.clone())
    }

    pub fn store(&mut self, key: &CacheKey, output: impl Into<String>) {
        let entry = CacheEntry {
            key: key.digest.clone(),
            fingerprint: key.fingerprint.clone(),
            output: output.into(),
            created_at: Local::now(),
        };
        self.entries.insert(key.digest.clone(), entry);
    }

    pub fn invalidate_all(&mut self) {
        if !self.entries.is_empty() {
            debug!(entries = self.entries.len(), "invalidating result cache");
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn corrupt(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(&key.digest) {
            entry.fingerprint.push('!');
        }
    }
}
