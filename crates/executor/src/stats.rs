use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    /// Running mean in milliseconds.
    pub average_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub average_time: f64,
    pub by_tool: HashMap<String, ToolStats>,
}

fn running_mean(mean: f64, count: u64, sample: f64) -> f64 {
    (mean * (count - 1) as f64 + sample) / count as f64
}

impl ExecutionStats {
    pub fn record(&mut self, tool: &str, success: bool, duration_ms: u64) {
        let sample = duration_ms as f64;

        self.total += 1;
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        self.average_time = running_mean(self.average_time, self.total, sample);

        let entry = self.by_tool.entry(tool.to_string()).or_default();
        entry.executions += 1;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        entry.average_time = running_mean(entry.average_time, entry.executions, sample);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average() {
        let mut stats = ExecutionStats::default();
        stats.record("echo", true, 10);
        stats.record("echo", false, 20);
        stats.record("echo", true, 30);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failure, 1);
        assert!((stats.average_time - 20.0).abs() < f64::EPSILON);

        let echo = &stats.by_tool["echo"];
        assert_eq!(echo.executions, 3);
        assert_eq!(echo.failures, 1);
        assert!((echo.average_time - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_per_tool_isolation() {
        let mut stats = ExecutionStats::default();
        stats.record("a", true, 100);
        stats.record("b", true, 0);

        assert!((stats.average_time - 50.0).abs() < f64::EPSILON);
        assert!((stats.by_tool["a"].average_time - 100.0).abs() < f64::EPSILON);
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    proptest::proptest! {
        #[test]
        fn prop_running_mean_matches_arithmetic_mean(samples in proptest::collection::vec(0u64..100_000, 1..64)) {
            let mut stats = ExecutionStats::default();
            for sample in &samples {
                stats.record("tool", true, *sample);
            }
            let expected = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
            proptest::prop_assert!((stats.average_time - expected).abs() < 1e-6 * expected.max(1.0));
            proptest::prop_assert_eq!(stats.by_tool["tool"].executions, samples.len() as u64);
        }
    }
}
