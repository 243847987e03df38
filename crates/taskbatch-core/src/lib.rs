//! Batch execution engine for the task CLI.

pub mod cache;
pub mod classify;
pub mod config;
pub mod executor;
pub mod failure;
pub mod group;
pub mod output;
pub mod parser;
pub mod runner;
pub mod scratch;
pub mod session;
pub mod state;
pub mod stats;

#[cfg(test)]
mod test_env;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::version;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
