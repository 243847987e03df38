use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::executor::ExecutionResult;

/// Per-invocation overhead avoided by batching, in dollars.
pub const DEFAULT_OVERHEAD_COST: f64 = 0.02;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub commands_submitted: usize,
    /// Commands that reached the task program (misses, writes, other).
    pub commands_run: usize,
    pub cache_hits: usize,
    pub failures: usize,
    pub total_duration_ms: u64,
    pub by_name: BTreeMap<String, usize>,
}

impl SessionStats {
    pub fn record(&mut self, result: &ExecutionResult) {
        if result.from_cache {
            self.cache_hits += 1;
        } else {
            self.commands_run += 1;
        }
        if !result.succeeded() {
            self.failures += 1;
        }
        self.total_duration_ms = self.total_duration_ms.saturating_add(result.duration_ms);
        *self.by_name.entry(result.command.name.clone()).or_insert(0) += 1;
    }

    pub fn processed(&self) -> usize {
        self.commands_run + self.cache_hits
    }

    pub fn from_results<'a>(
        submitted: usize,
        results: impl IntoIterator<Item = &'a ExecutionResult>,
    ) -> Self {
        let mut stats = SessionStats {
            commands_submitted: submitted,
            ..SessionStats::default()
        };
        for result in results {
            stats.record(result);
        }
        stats
    }
}

/// End-of-session figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub commands_submitted: usize,
    pub commands_executed: usize,
    pub cache_hits: usize,
    pub failures: usize,
    pub batches_saved: usize,
    pub elapsed_secs: f64,
    pub estimated_savings: f64,
    pub aborted: bool,
    pub by_name: BTreeMap<String, usize>,
}

impl BatchSummary {
    pub fn from_stats(
        stats: &SessionStats,
        elapsed: Duration,
        overhead_cost: f64,
        aborted: bool,
    ) -> Self {
        let batches_saved = stats.processed().saturating_sub(1);
        Self {
            commands_submitted: stats.commands_submitted,
            commands_executed: stats.commands_run,
            cache_hits: stats.cache_hits,
            failures: stats.failures,
            batches_saved,
            elapsed_secs: elapsed.as_secs_f64(),
            estimated_savings: batches_saved as f64 * overhead_cost,
            aborted,
            by_name: stats.by_name.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            "Batch summary".to_string(),
            format!("  Commands executed: {}", self.commands_executed),
            format!("  Cache hits:        {}", self.cache_hits),
            format!("  Batches saved:     {}", self.batches_saved),
            format!("  Elapsed:           {:.2}s", self.elapsed_secs),
            format!("  Estimated savings: ${:.2}", self.estimated_savings),
        ];
        if self.failures > 0 {
            lines.push(format!("  Failures:          {}", self.failures));
        }
        if self.aborted {
            let skipped = self
                .commands_submitted
                .saturating_sub(self.commands_executed + self.cache_hits);
            lines.push(format!("  Aborted; {skipped} command(s) not run"));
        }
        if !self.by_name.is_empty() {
            lines.push("  By command:".to_string());
            for (name, count) in &self.by_name {
                lines.push(format!("    {name}: {count}"));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_line, RawLine};
    use pretty_assertions::assert_eq;

    fn result(text: &str, exit_code: i32, from_cache: bool, duration_ms: u64) -> ExecutionResult {
        let command = parse_line(&RawLine::new(1, text)).expect("command");
        ExecutionResult {
            command,
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            from_cache,
            duration_ms,
            truncated: false,
        }
    }

    #[test]
    fn stats_follow_the_result_stream() {
        let results = vec![
            result("list --json", 0, false, 40),
            result("list --json", 0, true, 0),
            result("add x", 2, false, 10),
            result("list --json", 0, false, 35),
        ];
        let stats = SessionStats::from_results(5, &results);
        assert_eq!(stats.commands_submitted, 5);
        assert_eq!(stats.commands_run, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.total_duration_ms, 85);
        assert_eq!(
            stats.by_name,
            BTreeMap::from([("add".to_string(), 1), ("list".to_string(), 3)])
        );
    }

    #[test]
    fn summary_derives_savings_from_processed_commands() {
        let results = vec![
            result("list", 0, false, 0),
            result("list", 0, true, 0),
            result("list", 0, true, 0),
            result("list", 0, true, 0),
        ];
        let stats = SessionStats::from_results(4, &results);
        let summary = BatchSummary::from_stats(&stats, Duration::from_millis(1500), 0.5, false);
        assert_eq!(summary.commands_executed, 1);
        assert_eq!(summary.cache_hits, 3);
        assert_eq!(summary.batches_saved, 3);
        assert_eq!(summary.estimated_savings, 1.5);
        assert_eq!(summary.elapsed_secs, 1.5);
    }

    #[test]
    fn empty_session_saves_nothing() {
        let summary =
            BatchSummary::from_stats(&SessionStats::default(), Duration::ZERO, 0.02, false);
        assert_eq!(summary.batches_saved, 0);
        assert_eq!(summary.estimated_savings, 0.0);
    }

    #[test]
    fn render_includes_all_headline_fields() {
        let stats = SessionStats::from_results(3, &[result("show 1", 0, false, 0)]);
        let text = BatchSummary::from_stats(&stats, Duration::from_secs(2), 0.02, true).render();
        assert!(text.contains("Commands executed: 1"));
        assert!(text.contains("Cache hits:        0"));
        assert!(text.contains("Batches saved:     0"));
        assert!(text.contains("Elapsed:           2.00s"));
        assert!(text.contains("Estimated savings: $0.00"));
        assert!(text.contains("Aborted; 2 command(s) not run"));
        assert!(text.contains("    show: 1"));
    }
}
